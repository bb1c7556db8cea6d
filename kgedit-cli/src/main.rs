use clap::{Parser, Subcommand, ValueEnum};
use kgedit::api::MemoryFixture;
use kgedit::{EditorConfig, FieldContext, Instance, InstanceStore, MemoryApi, TypeRegistry};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

/// kgedit CLI: load, edit and save instances of a knowledge graph held in a
/// fixture file
#[derive(Parser)]
#[command(name = "kgedit", version, about)]
struct Cli {
    /// Fixture with types, spaces and instances
    #[arg(long, default_value = "fixture.yaml")]
    fixture: PathBuf,

    /// Editor configuration file (queues, links, stage)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch an instance and print its fields
    Show {
        /// Instance ID
        id: String,
    },

    /// Fetch labels of several instances in one batch
    Labels {
        /// Instance IDs
        ids: Vec<String>,
    },

    /// Load every instance reachable from an instance
    Closure {
        /// Root instance ID
        id: String,
    },

    /// Change field values and print the diff
    Edit {
        /// Instance ID
        id: String,
        /// Field values (e.g. --set title="A new title")
        #[arg(long = "set", value_parser = parse_key_value)]
        values: Vec<(String, String)>,
        /// Save the changes
        #[arg(long)]
        save: bool,
    },

    /// Create and save a new instance
    Create {
        /// Type name
        type_name: String,
        /// Space to create the instance in
        #[arg(long)]
        space: String,
        /// Field values (e.g. --set fullName="Ada Lovelace")
        #[arg(long = "set", value_parser = parse_key_value)]
        values: Vec<(String, String)>,
    },

    /// Print validation warnings of an instance
    Validate {
        /// Instance ID
        id: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

/// Build a store over the fixture's in-memory backend
fn open_store(fixture: &Path, config: Option<&Path>) -> kgedit::Result<Arc<InstanceStore>> {
    let fixture = MemoryFixture::from_path(fixture)?;
    let config = match config {
        Some(path) => EditorConfig::from_path(path)?,
        None => EditorConfig::default(),
    };
    let ctx = FieldContext::new(TypeRegistry::from_types(fixture.types.clone()), config);
    let spaces = fixture.spaces.clone();
    let store = InstanceStore::new(Arc::new(MemoryApi::new(fixture)), ctx);
    store.set_user_spaces(spaces);
    Ok(store)
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&cli.fixture, cli.config.as_deref())?;

    let output = match cli.command {
        Command::Show { id } => {
            let handle = store.get_instance(&id).await?;
            let instance = handle.lock();
            instance_to_value(&instance)
        }

        Command::Labels { ids } => {
            // Queue everything first so the labels go out as one batch
            for id in &ids {
                store.fetch_instance_label(id, false);
            }
            let mut labels = Vec::new();
            for id in &ids {
                let label = match store.get_instance_label(id).await {
                    Ok(handle) => {
                        let instance = handle.lock();
                        json!({
                            "id": id,
                            "name": instance.display_name(),
                            "types": instance.type_names(),
                        })
                    }
                    Err(e) => json!({ "id": id, "error": e.to_string() }),
                };
                labels.push(label);
            }
            Value::Array(labels)
        }

        Command::Closure { id } => {
            store.get_instance(&id).await?;
            loop {
                let missing: Vec<String> = store
                    .linked_ids_closure(&[id.as_str()])
                    .into_iter()
                    .filter(|child| {
                        store
                            .get(child)
                            .map_or(true, |h| !h.lock().fetch_state().is_terminal())
                    })
                    .collect();
                if missing.is_empty() {
                    break;
                }
                for child in &missing {
                    store.fetch_instance(child, false);
                }
                for child in &missing {
                    if let Err(e) = store.get_instance(child).await {
                        log::warn!("Skipping {child}: {e}");
                    }
                }
            }
            let linked = store
                .linked_ids_closure(&[id.as_str()])
                .into_iter()
                .filter_map(|child| {
                    let handle = store.get(&child)?;
                    let instance = handle.lock();
                    instance
                        .fetch_state()
                        .is_fetched()
                        .then(|| json!({ "id": child, "name": instance.display_name() }))
                })
                .collect();
            Value::Array(linked)
        }

        Command::Edit { id, values, save } => {
            let handle = store.get_instance(&id).await?;
            let diff = {
                let mut instance = handle.lock();
                apply_values(&mut instance, &values)?;
                diff_to_value(&instance)
            };
            if save {
                store.save_instance(&id).await?;
            }
            json!({ "id": id, "saved": save, "changes": diff })
        }

        Command::Create {
            type_name,
            space,
            values,
        } => {
            let handle = store.create_new_instance(&type_name, &space)?;
            let id = {
                let mut instance = handle.lock();
                apply_values(&mut instance, &values)?;
                instance.id().to_string()
            };
            let saved = store.save_instance(&id).await?;
            let instance = saved.lock();
            instance_to_value(&instance)
        }

        Command::Validate { id } => {
            let handle = store.get_instance(&id).await?;
            let instance = handle.lock();
            let warnings: Map<String, Value> = instance
                .validation_warnings()
                .into_iter()
                .map(|(field, warning)| (field, Value::String(warning)))
                .collect();
            json!({ "id": id, "valid": warnings.is_empty(), "warnings": warnings })
        }
    };

    print_output(&output, &cli.format)?;
    Ok(())
}

fn apply_values(instance: &mut Instance, values: &[(String, String)]) -> kgedit::Result<()> {
    for (name, raw) in values {
        let field = instance.field_mut(name).ok_or_else(|| kgedit::KgError::InvalidValue {
            field: name.clone(),
            message: "no such field".to_string(),
        })?;
        field.set_value(parse_value(raw))?;
    }
    Ok(())
}

/// JSON for numbers, booleans, lists and objects; anything else is text
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn instance_to_value(instance: &Instance) -> Value {
    let mut fields = Map::new();
    for name in instance.ordered_field_names() {
        if let Some(field) = instance.field(name) {
            fields.insert(name.to_string(), field.value());
        }
    }
    json!({
        "id": instance.id(),
        "name": instance.display_name(),
        "types": instance.type_names(),
        "space": instance.space(),
        "fields": fields,
    })
}

fn diff_to_value(instance: &Instance) -> Value {
    instance
        .field_diffs()
        .into_iter()
        .map(|diff| {
            json!({
                "field": diff.name,
                "label": diff.label,
                "before": diff.before.value,
                "after": diff.after.value,
            })
        })
        .collect()
}

fn print_output(value: &Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FIXTURE: &str = r#"
types:
  - name: Person
    labelField: fullName
    spaces: [common]
    fields:
      fullName:
        widget: InputText
        isRequired: true
      knows:
        widget: DynamicDropdown
        targetTypes: [{ name: Person }]
spaces:
  - { name: common, canCreate: true }
instances:
  - id: p1
    types: [Person]
    space: common
    values: { fullName: Ada, knows: [{ "@id": p2 }] }
  - id: p2
    types: [Person]
    space: common
    values: { fullName: Charles }
"#;

    fn fixture_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FIXTURE.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("title=A = B").unwrap(),
            ("title".to_string(), "A = B".to_string())
        );
        assert!(parse_key_value("title").is_err());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("[\"a\"]"), json!(["a"]));
        assert_eq!(parse_value("Ada Lovelace"), json!("Ada Lovelace"));
    }

    #[tokio::test]
    async fn test_show_and_edit_through_store() {
        let file = fixture_file();
        let store = open_store(file.path(), None).unwrap();

        let handle = store.get_instance("p1").await.unwrap();
        let shown = instance_to_value(&handle.lock());
        assert_eq!(shown["name"], json!("Ada"));
        assert_eq!(shown["fields"]["fullName"], json!("Ada"));

        let diff = {
            let mut instance = handle.lock();
            apply_values(&mut instance, &[("fullName".into(), "Ada Lovelace".into())]).unwrap();
            diff_to_value(&instance)
        };
        assert_eq!(diff[0]["before"], json!("Ada"));
        assert_eq!(diff[0]["after"], json!("Ada Lovelace"));

        let mut instance = handle.lock();
        assert!(apply_values(&mut instance, &[("missing".into(), "x".into())]).is_err());
    }

    #[tokio::test]
    async fn test_open_store_with_config() {
        let file = fixture_file();
        let mut config = tempfile::NamedTempFile::new().unwrap();
        config
            .write_all(b"queues:\n  full:\n    threshold: 1\n    debounce_ms: 0\n")
            .unwrap();
        let store = open_store(file.path(), Some(config.path())).unwrap();
        assert_eq!(store.context().config.queues.full.threshold, 1);
        assert_eq!(store.user_spaces().len(), 1);

        let handle = store.create_new_instance("Person", "common").unwrap();
        let id = handle.lock().id().to_string();
        apply_values(&mut handle.lock(), &[("fullName".into(), "Mary".into())]).unwrap();
        let saved = store.save_instance(&id).await.unwrap();
        assert!(!saved.lock().is_new());
    }

    #[test]
    fn test_missing_fixture_fails() {
        assert!(open_store(Path::new("/nonexistent/fixture.yaml"), None).is_err());
    }
}
