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

use crate::error::{DrydockError, Result};
use std::io::Read;
use std::path::Path;
use std::process;

pub fn open_local_file(path: &Path) -> Result<std::fs::File> {
    std::fs::File::open(path)
        .map_err(|_x| DrydockError::Config(format!("unable to open file: {}", path.display())))
}

pub fn read_local_file(path: &Path) -> Result<String> {
    let mut file = open_local_file(path)?;
    let mut buffer = String::new();
    match file.read_to_string(&mut buffer) {
        Ok(_) => Ok(buffer),
        Err(x) => Err(DrydockError::Config(format!(
            "unable to read file: {}, {:?}",
            path.display(),
            x
        ))),
    }
}

pub fn write_local_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content)
        .map_err(|x| DrydockError::Config(format!("unable to write file: {}, {:?}", path.display(), x)))
}

// quit with a message and code - don't use this except in main.rs!
pub fn quit(s: &str, code: i32) -> ! {
    eprintln!("{}", s);
    process::exit(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_write_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.txt");
        write_local_file(&path, "hello\n").unwrap();
        assert_eq!(read_local_file(&path).unwrap(), "hello\n");
    }

    #[test]
    fn test_read_missing_file_is_config_error() {
        let r = read_local_file(Path::new("/nonexistent/definitely/missing"));
        assert!(matches!(r, Err(DrydockError::Config(_))));
    }
}
