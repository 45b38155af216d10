// Anaximander: Planning and Simulating Traceroute-Based Probing Campaigns
// Copyright (C) 2024-2025 The Anaximander developers
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Run statistics. The strategy and simulation steps print tagged lines
//! (`<file-tag> <values...>`) on stdout, which the operator redirects to
//! `output.txt`; afterwards the lines are split into one file per tag.

use std::{
    collections::BTreeMap,
    fs,
    io::{IsTerminal, Write},
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::error::{Error, Result};

static ENABLED: AtomicBool = AtomicBool::new(true);

pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

/// Print one statistics line (`<file-tag> <values...>`) to stdout.
pub fn emit(line: std::fmt::Arguments<'_>) {
    if ENABLED.load(Ordering::Relaxed) {
        println!("{line}");
    }
}

/// Statistics go through stdout; refuse to run interactively so they are
/// not lost.
pub fn ensure_redirected() -> Result<()> {
    if std::io::stdout().is_terminal() {
        return Err(Error::missing(
            "output_mode",
            "please redirect output to a file to get statistics on the run",
        ));
    }
    Ok(())
}

/// Split `<dir>/output.txt` (the redirected statistics) into one file
/// per leading tag, dropping the tag from each line. Nothing happens
/// when the file does not exist.
pub fn split_stats_file(dir: &Path) -> Result<()> {
    // statistics lines may still sit in the stdout buffer
    let _ = std::io::stdout().flush();
    let source = dir.join("output.txt");
    let Ok(content) = fs::read_to_string(&source) else {
        return Ok(());
    };
    let mut per_tag: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for line in content.lines() {
        let Some((tag, rest)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        per_tag.entry(tag).or_default().push(rest);
    }
    for (tag, lines) in per_tag {
        let path = dir.join(tag);
        let file = fs::File::create(&path).map_err(|e| Error::io("split_stats_file", &path, e))?;
        let mut writer = std::io::BufWriter::new(file);
        for line in lines {
            writeln!(writer, "{line}").map_err(|e| Error::io("split_stats_file", &path, e))?;
        }
    }
    Ok(())
}

/// Concatenate the per-AS truncated-limit files (`*limits_reduction.txt`)
/// into `all_reduction.txt` and remove them. A run without any is fine.
pub fn merge_reduction_files(dir: &Path) -> Result<()> {
    let mut sources: Vec<std::path::PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with("limits_reduction.txt"))
            })
            .collect(),
        Err(_) => return Ok(()),
    };
    if sources.is_empty() {
        return Ok(());
    }
    sources.sort();

    let target = dir.join("all_reduction.txt");
    let file = fs::File::create(&target).map_err(|e| Error::io("merge_reduction_files", &target, e))?;
    let mut writer = std::io::BufWriter::new(file);
    for source in sources {
        let content =
            fs::read_to_string(&source).map_err(|e| Error::io("merge_reduction_files", &source, e))?;
        writer
            .write_all(content.as_bytes())
            .map_err(|e| Error::io("merge_reduction_files", &target, e))?;
        fs::remove_file(&source).map_err(|e| Error::io("merge_reduction_files", &source, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stats_split_by_leading_tag() {
        let dir = std::env::temp_dir().join(format!("anaximander_stats_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("output.txt"),
            "missing_prefixes.txt 174 3\nraw.txt 174 10 2 30 4\nmissing_prefixes.txt 3356 0\n",
        )
        .unwrap();

        split_stats_file(&dir).unwrap();

        assert_eq!(
            fs::read_to_string(dir.join("missing_prefixes.txt")).unwrap(),
            "174 3\n3356 0\n"
        );
        assert_eq!(
            fs::read_to_string(dir.join("raw.txt")).unwrap(),
            "174 10 2 30 4\n"
        );
        fs::remove_dir_all(dir).ok();
    }
}
