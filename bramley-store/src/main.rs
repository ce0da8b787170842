use std::env;
use std::fs::metadata;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use bramley::btree::Bramley;
use bramley::btree::Direction;
use bramley::record::Pair;
use clap::CommandFactory;
use clap::Parser;
use clap::Subcommand;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use strum::EnumString;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Structure file location
    structure: PathBuf,

    /// Data file location (defaults to the structure file with a .dat extension)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Create a new index (will overwrite existing files)
    #[arg(short, long, default_value_t = false)]
    create: bool,

    /// Order of a new index
    #[arg(short, long, default_value_t = 13)]
    order: usize,

    #[command(subcommand)]
    parameter: Option<Parameter>,
}

#[derive(Debug, EnumString, Subcommand)]
#[strum(ascii_case_insensitive)]
enum Parameter {
    /// Does our index contain this key
    Contains { key: String },
    /// Clear index entries
    Clear,
    /// Display B-Tree entry count
    Count,
    /// Delete this key
    Delete { key: String },
    /// List index entries
    Entries {
        /// Direction (Descending or Ascending)
        direction: Option<Direction>,
    },
    /// Get this key
    Get { key: String },
    /// Interactive Help
    Help,
    /// Insert key value pair
    Insert { key: String, value: String },
    /// List index keys
    Keys {
        /// Direction (Descending or Ascending)
        direction: Option<Direction>,
    },
    /// List index nodes, level by level
    Nodes,
    /// Write the index to its files
    Save,
    /// Node Utilization
    Utilization,
    /// List index values
    Values {
        /// Direction (Descending or Ascending)
        direction: Option<Direction>,
    },
    /// Verify index
    Verify,
}

/// An open index and the files it lives in.
struct Store {
    btree: Bramley<Pair<String, String>>,
    structure: PathBuf,
    data: PathBuf,
    dirty: bool,
}

impl Store {
    fn save(&mut self) -> Result<()> {
        self.btree.write(&self.structure, &self.data)?;
        self.dirty = false;
        Ok(())
    }
}

fn get_history_file() -> Option<PathBuf> {
    dirs::preference_dir()
        .and_then(|mut base| {
            base.push("bramley");
            // Note: Not create_dir_all(), because we don't want to create preference
            // dirs if they don't exist.
            if metadata(base.clone()).ok().is_none() {
                std::fs::create_dir(base.clone()).ok()?
            }
            Some(base)
        })
        .map(|mut base| {
            base.push("history.txt");
            base
        })
}

// EnumString doesn't deal with variant parameters, so fill them in from the remaining words.
fn parse_line(words: &[&str]) -> Result<Parameter, String> {
    let parameter = Parameter::from_str(words[0]).map_err(|e| format!("error: {e}"))?;
    let direction = |name: &str| match words.len() {
        1 => Ok(None),
        2 => Direction::from_str(words[1])
            .map(Some)
            .map_err(|_| format!("usage: {name} [<direction>]")),
        _ => Err(format!("usage: {name} [<direction>]")),
    };
    let key = |name: &str| match words {
        [_, key] => Ok(key.to_string()),
        _ => Err(format!("usage: {name} <key>")),
    };
    Ok(match parameter {
        Parameter::Contains { .. } => Parameter::Contains {
            key: key("contains")?,
        },
        Parameter::Delete { .. } => Parameter::Delete {
            key: key("delete")?,
        },
        Parameter::Get { .. } => Parameter::Get { key: key("get")? },
        Parameter::Insert { .. } => match words {
            [_, key, value] => Parameter::Insert {
                key: key.to_string(),
                value: value.to_string(),
            },
            _ => return Err("usage: insert <key> <value>".to_string()),
        },
        Parameter::Entries { .. } => Parameter::Entries {
            direction: direction("entries")?,
        },
        Parameter::Keys { .. } => Parameter::Keys {
            direction: direction("keys")?,
        },
        Parameter::Values { .. } => Parameter::Values {
            direction: direction("values")?,
        },
        p => p,
    })
}

fn interactive(store: &mut Store) -> Result<()> {
    // `()` can be used when no completer is required
    let mut rl = DefaultEditor::new()?;
    if let Some(file_location) = get_history_file() {
        if let Err(e) = rl.load_history(&file_location) {
            tracing::warn!("error loading history: {e}");
        }
    }
    println!("terminate with ctrl-c or ctrl-d");
    loop {
        let readline = rl.readline("word: ");
        match readline {
            Ok(line) => {
                let words = line.split_whitespace().collect::<Vec<&str>>();
                if words.is_empty() {
                    continue;
                }
                match parse_line(&words) {
                    Ok(parameter) => process_parameter(store, &parameter),
                    Err(usage) => {
                        println!("{usage}");
                        continue;
                    }
                }
                rl.add_history_entry(line.as_str())?;
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("terminating...");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
    if let Some(file_location) = get_history_file() {
        if let Err(e) = rl.save_history(&file_location) {
            tracing::warn!("error saving history: {e}");
        }
    }
    if store.dirty {
        store.save()?;
    }
    Ok(())
}

fn process_parameter(store: &mut Store, parameter: &Parameter) {
    let btree = &mut store.btree;
    match parameter {
        Parameter::Contains { key } => println!("{}", btree.contains(key)),
        Parameter::Clear => {
            if !btree.is_empty() {
                btree.clear();
                store.dirty = true;
            }
            println!("cleared");
        }
        Parameter::Count => println!("count: {}", btree.len()),
        Parameter::Delete { key } => match btree.delete(key) {
            Ok(pair) => {
                store.dirty = true;
                println!("deleted: {key}: {}", pair.value);
            }
            Err(err) => println!("delete failed: {err}"),
        },
        Parameter::Get { key } => match btree.find(key) {
            Some(pair) => println!("{}", pair.value),
            None => println!("not found"),
        },
        Parameter::Help => {
            let help = Cli::command().render_help().to_string();

            let mut print_it = false;

            for line in help.lines() {
                if line.starts_with("Arguments:") {
                    print_it = false;
                }
                if print_it && !line.is_empty() {
                    println!("{}", line);
                }
                if line.starts_with("Commands:") {
                    print_it = true;
                }
            }
        }
        Parameter::Insert { key, value } => {
            match btree.add(Pair::new(key.clone(), value.clone())) {
                Ok(()) => {
                    store.dirty = true;
                    println!("inserted: {key}: {value}");
                }
                Err(err) => println!("insert failed: {err}"),
            }
        }
        Parameter::Entries { direction } => {
            for pair in btree.iter(direction.unwrap_or(Direction::Ascending)) {
                println!("{}: {}", pair.key, pair.value);
            }
        }
        Parameter::Keys { direction } => {
            let keys = btree
                .iter(direction.unwrap_or(Direction::Ascending))
                .map(|pair| pair.key.as_str())
                .collect::<Vec<&str>>();
            println!("{}", keys.join(", "));
        }
        Parameter::Values { direction } => {
            let values = btree
                .iter(direction.unwrap_or(Direction::Ascending))
                .map(|pair| pair.value.as_str())
                .collect::<Vec<&str>>();
            println!("{}", values.join(", "));
        }
        Parameter::Nodes => {
            for (depth, level) in btree.levels().iter().enumerate() {
                let nodes = level
                    .iter()
                    .map(|node| {
                        let keys = node.iter().map(|p| p.key.as_str()).collect::<Vec<&str>>();
                        format!("[{}]", keys.join(" "))
                    })
                    .collect::<Vec<String>>();
                println!("level {depth}: {}", nodes.join(" "));
            }
        }
        Parameter::Save => match store.save() {
            Ok(()) => println!("saved"),
            Err(e) => println!("save failed: {e}"),
        },
        Parameter::Utilization => {
            println!("Utilization: {:.1}%", 100.0 * btree.utilization());
        }
        Parameter::Verify => match btree.verify() {
            Ok(()) => println!("Ok"),
            Err(e) => println!("Verification failed: {e}"),
        },
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = match env::var("TMPDIR") {
        Ok(d) => d,
        Err(_e) => ".".to_string(),
    };

    let file_appender = tracing_appender::rolling::daily(log_dir, "bramley.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(non_blocking)
        .init();

    let data = cli
        .data
        .clone()
        .unwrap_or_else(|| cli.structure.with_extension("dat"));

    let btree = if cli.create {
        Bramley::try_new(cli.order)?
    } else {
        Bramley::try_read(&cli.structure, &data)?
    };
    let mut store = Store {
        btree,
        structure: cli.structure,
        data,
        dirty: cli.create,
    };
    store.btree.info();

    match cli.parameter {
        Some(parameter) => {
            process_parameter(&mut store, &parameter);
            if store.dirty {
                store.save()?;
            }
        }
        None => interactive(&mut store)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store {
            btree: Bramley::try_new(5).expect("creates tree"),
            structure: PathBuf::from("store_test.idx"),
            data: PathBuf::from("store_test.dat"),
            dirty: false,
        }
    }

    fn insert(key: &str) -> Parameter {
        Parameter::Insert {
            key: key.to_string(),
            value: "value".to_string(),
        }
    }

    #[test]
    fn it_marks_successful_changes_dirty() {
        let mut store = store();
        process_parameter(&mut store, &insert("a"));
        assert!(store.dirty);

        store.dirty = false;
        process_parameter(
            &mut store,
            &Parameter::Delete {
                key: "a".to_string(),
            },
        );
        assert!(store.dirty);
        assert!(store.btree.is_empty());
    }

    #[test]
    fn it_leaves_failed_changes_clean() {
        let mut store = store();
        process_parameter(&mut store, &insert("a"));
        store.dirty = false;

        process_parameter(&mut store, &insert("a"));
        assert!(!store.dirty);
        process_parameter(
            &mut store,
            &Parameter::Delete {
                key: "missing".to_string(),
            },
        );
        assert!(!store.dirty);
        process_parameter(&mut store, &Parameter::Count);
        assert!(!store.dirty);
        assert_eq!(store.btree.len(), 1);
    }

    #[test]
    fn it_only_marks_clear_dirty_when_entries_go() {
        let mut store = store();
        process_parameter(&mut store, &Parameter::Clear);
        assert!(!store.dirty);

        process_parameter(&mut store, &insert("a"));
        store.dirty = false;
        process_parameter(&mut store, &Parameter::Clear);
        assert!(store.dirty);
        assert!(store.btree.is_empty());
    }
}
