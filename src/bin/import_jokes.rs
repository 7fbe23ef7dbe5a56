//! Create or extend the joke database.
//!
//! Usage: cargo run --bin import_jokes <jokes.json|jokes.txt> [db_path]
//!
//! JSON input is an array of strings or of `{"joke": "..."}` objects.
//! Any other file is read as one joke per line.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use jarvisbot::bot::Database;

const DEFAULT_DB_PATH: &str = "data/jarvisbot.db";

/// A joke entry can be a bare string or an object
#[derive(Deserialize)]
#[serde(untagged)]
enum JokeEntry {
    Plain(String),
    Record { joke: String },
}

impl JokeEntry {
    fn into_text(self) -> String {
        match self {
            JokeEntry::Plain(text) => text,
            JokeEntry::Record { joke } => joke,
        }
    }
}

fn parse_jokes(path: &Path, contents: &str) -> Result<Vec<String>, serde_json::Error> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let jokes: Vec<String> = if is_json {
        let entries: Vec<JokeEntry> = serde_json::from_str(contents)?;
        entries.into_iter().map(JokeEntry::into_text).collect()
    } else {
        contents.lines().map(str::to_string).collect()
    };

    Ok(jokes
        .into_iter()
        .map(|j| j.trim().to_string())
        .filter(|j| !j.is_empty())
        .collect())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: {} <jokes.json|jokes.txt> [db_path]", args[0]);
        eprintln!();
        eprintln!("Import jokes into the bot database, creating it if needed.");
        eprintln!("Jokes already present are skipped.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  jokes.json|jokes.txt  JSON array of strings or {{\"joke\": ...}} objects, or one joke per line");
        eprintln!("  db_path               Database to write (default: {DEFAULT_DB_PATH})");
        return ExitCode::FAILURE;
    }

    let source = Path::new(&args[1]);
    let db_path = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

    println!("Reading jokes from {:?}...", source);
    let contents = match std::fs::read_to_string(source) {
        Ok(contents) => contents,
        Err(e) => {
            eprintln!("Failed to read {:?}: {e}", source);
            return ExitCode::FAILURE;
        }
    };
    let jokes = match parse_jokes(source, &contents) {
        Ok(jokes) => jokes,
        Err(e) => {
            eprintln!("Failed to parse {:?}: {e}", source);
            return ExitCode::FAILURE;
        }
    };
    println!("Found {} jokes", jokes.len());

    let db = match Database::create(&db_path) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to open {:?}: {e}", db_path);
            return ExitCode::FAILURE;
        }
    };

    let mut added = 0;
    let mut skipped = 0;
    for joke in &jokes {
        let outcome = db
            .has_joke(joke)
            .and_then(|exists| if exists { Ok(false) } else { db.add_joke(joke).map(|_| true) });
        match outcome {
            Ok(true) => added += 1,
            Ok(false) => skipped += 1,
            Err(e) => {
                eprintln!("Failed to store joke: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    println!("New jokes added: {added} ({skipped} duplicates skipped)");
    match db.joke_count() {
        Ok(total) => println!("Total jokes in {:?}: {total}", db_path),
        Err(e) => eprintln!("Failed to count jokes: {e}"),
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_strings_and_objects() {
        let jokes = parse_jokes(
            Path::new("jokes.json"),
            r#"["Chuck Norris can divide by zero.", {"joke": "  Chuck Norris wins at solitaire.  "}, ""]"#,
        )
        .unwrap();
        assert_eq!(jokes, vec!["Chuck Norris can divide by zero.", "Chuck Norris wins at solitaire."]);
    }

    #[test]
    fn test_text_lines() {
        let jokes = parse_jokes(Path::new("jokes.txt"), "one\n\n  two  \r\nthree\n").unwrap();
        assert_eq!(jokes, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_invalid_json() {
        assert!(parse_jokes(Path::new("jokes.JSON"), "{not json").is_err());
    }
}
