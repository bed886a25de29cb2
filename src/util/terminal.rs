// Drydock
// Copyright (C) 2025 - Drydock Project Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// long with this program.  If not, see <http://www.gnu.org/licenses/>.

pub fn markdown_print(markdown: &str) {
    termimad::print_text(markdown);
}

pub fn banner(msg: &str) {
    let markdown = format!(
        "|:-|\n\
         |{}|\n\
         |-",
        msg
    );
    markdown_print(&markdown);
}

pub fn two_column_table(header_a: &str, header_b: &str, elements: &[(String, String)]) {
    let mut buffer = String::from("|:-|:-\n");
    buffer.push_str(&format!("|{}|{}\n", header_a, header_b));
    for (a, b) in elements.iter() {
        buffer.push_str("|-|-\n");
        buffer.push_str(&format!("|{}|{}\n", a, b));
    }
    buffer.push_str("|-|-\n");
    markdown_print(&buffer);
}

pub fn captioned_display(caption: &str, body: &str) {
    banner(caption);
    println!();
    for line in body.lines() {
        println!("    {}", line);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner() {
        // Just verify it doesn't panic
        banner("Test Banner Message");
    }

    #[test]
    fn test_two_column_table() {
        let elements = vec![
            (String::from("pve1"), String::from("succeeded")),
            (String::from("pve2"), String::from("failed")),
        ];
        two_column_table("host", "outcome", &elements);
    }

    #[test]
    fn test_two_column_table_empty() {
        let elements: Vec<(String, String)> = vec![];
        two_column_table("host", "outcome", &elements);
    }

    #[test]
    fn test_captioned_display() {
        captioned_display("Caption", "Line 1\nLine 2");
    }
}
