//! Directory walks used to discover configuration fragments.
//!
//! Paths handed out by the scanner are relative to its root, `/`-separated,
//! with `.` standing for the root itself.

use std::fs;
use std::io;

use camino::Utf8PathBuf;

/// A file with this name stops discovery below its directory.
pub const STOP_MARKER: &str = ".noquire";

#[derive(Debug, Clone)]
pub struct Scanner {
    root: Utf8PathBuf,
    exclude: Vec<String>,
}

struct Level {
    files: Vec<String>,
    dirs: Vec<String>,
    marked: bool,
}

impl Scanner {
    pub fn new(root: impl Into<Utf8PathBuf>, exclude: Vec<String>) -> Self {
        Self {
            root: root.into(),
            exclude,
        }
    }

    /// Pre-order walk yielding `(directory, filename)` pairs under `start`.
    ///
    /// Excluded directories are never entered. A directory holding the stop
    /// marker still has its own files yielded, but nothing below it is.
    pub fn walk(&self, start: &str) -> Walk<'_> {
        Walk {
            scanner: self,
            stack: vec![start.to_string()],
            current: None,
        }
    }

    /// Pre-order walk over the directories under `start` which hold no stop
    /// marker. Marked directories are skipped together with their subtree.
    pub fn directories(&self, start: &str) -> Directories<'_> {
        Directories {
            scanner: self,
            stack: vec![start.to_string()],
        }
    }

    fn read_level(&self, dir: &str) -> io::Result<Level> {
        let path = self.root.join(dir);
        let mut level = Level {
            files: Vec::new(),
            dirs: Vec::new(),
            marked: false,
        };

        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(name) => {
                    tracing::warn!("Skipping non UTF-8 entry {name:?} in '{path}'");
                    continue;
                }
            };

            let kind = entry.file_type()?;
            if kind.is_dir() {
                if !self.exclude.contains(&name) {
                    level.dirs.push(name);
                }
            } else if kind.is_symlink() && entry.path().is_dir() {
                continue;
            } else {
                if name == STOP_MARKER {
                    level.marked = true;
                }
                level.files.push(name);
            }
        }

        level.files.sort();
        level.dirs.sort();
        Ok(level)
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent == "." {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Every directory from `.` down to and including `dir`.
pub fn ancestors(dir: &str) -> Vec<String> {
    let mut acc = vec![".".to_string()];
    let mut path = String::new();

    for part in dir.split('/').filter(|part| !part.is_empty() && *part != ".") {
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(part);
        acc.push(path.clone());
    }

    acc
}

pub struct Walk<'a> {
    scanner: &'a Scanner,
    stack: Vec<String>,
    current: Option<(String, std::vec::IntoIter<String>)>,
}

impl Iterator for Walk<'_> {
    type Item = io::Result<(String, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((dir, files)) = &mut self.current {
                if let Some(file) = files.next() {
                    return Some(Ok((dir.clone(), file)));
                }
                self.current = None;
            }

            let dir = self.stack.pop()?;
            let level = match self.scanner.read_level(&dir) {
                Ok(level) => level,
                Err(err) => return Some(Err(err)),
            };

            if !level.marked {
                for sub in level.dirs.iter().rev() {
                    self.stack.push(join(&dir, sub));
                }
            }

            self.current = Some((dir, level.files.into_iter()));
        }
    }
}

pub struct Directories<'a> {
    scanner: &'a Scanner,
    stack: Vec<String>,
}

impl Iterator for Directories<'_> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let dir = self.stack.pop()?;
            let level = match self.scanner.read_level(&dir) {
                Ok(level) => level,
                Err(err) => return Some(Err(err)),
            };

            if level.marked {
                continue;
            }

            for sub in level.dirs.iter().rev() {
                self.stack.push(join(&dir, sub));
            }

            return Some(Ok(dir));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, Scanner) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        for sub in ["a/deep", "b/inner", "c", ".git"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }
        for file in [
            "top.txt",
            "a/one.txt",
            "a/deep/two.txt",
            "b/.noquire",
            "b/three.txt",
            "b/inner/four.txt",
            "c/five.txt",
            ".git/config",
        ] {
            fs::write(root.join(file), "").unwrap();
        }

        let scanner = Scanner::new(root, vec![".git".to_string()]);
        (dir, scanner)
    }

    #[test]
    fn test_walk_preorder_with_marker() {
        let (_dir, scanner) = fixture();
        let pairs: Vec<(String, String)> = scanner.walk(".").map(Result::unwrap).collect();
        let pairs: Vec<(&str, &str)> = pairs
            .iter()
            .map(|(d, f)| (d.as_str(), f.as_str()))
            .collect();

        assert_eq!(
            pairs,
            vec![
                (".", "top.txt"),
                ("a", "one.txt"),
                ("a/deep", "two.txt"),
                ("b", ".noquire"),
                ("b", "three.txt"),
                ("c", "five.txt"),
            ]
        );
    }

    #[test]
    fn test_walk_is_restartable() {
        let (_dir, scanner) = fixture();
        let first: Vec<_> = scanner.walk(".").map(Result::unwrap).collect();
        let second: Vec<_> = scanner.walk(".").map(Result::unwrap).collect();
        assert_eq!(first, second);

        let nested: Vec<_> = scanner.walk("a").map(Result::unwrap).collect();
        assert_eq!(nested.len(), 2);
    }

    #[test]
    fn test_directories_skip_marked() {
        let (_dir, scanner) = fixture();
        let dirs: Vec<String> = scanner.directories(".").map(Result::unwrap).collect();
        assert_eq!(dirs, vec![".", "a", "a/deep", "c"]);
    }

    #[test]
    fn test_ancestors() {
        assert_eq!(ancestors("."), vec!["."]);
        assert_eq!(ancestors("a/b"), vec![".", "a", "a/b"]);
        assert_eq!(ancestors("./a"), vec![".", "a"]);
    }
}
