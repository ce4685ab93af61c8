use std::{env, fs, process::ExitCode};

use cel::{compile, eval, plan, run_validators, CelType, MapActivation, Source, Value};
use cel::diagnostics::Severity;

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let Some(file_path) = args.get(1) else {
        eprintln!("usage: cel <expr.cel> [bindings.json]");
        return ExitCode::FAILURE;
    };

    let code = match read_file(file_path) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut env = cel::stdlib::standard_env();
    if let Some(config) = read_config("cel.toml") {
        apply_config(&mut env, &config);
    }

    let bindings = match args.get(2).map(|p| read_file(p)) {
        Some(Ok(json)) => match serde_json::from_str::<serde_json::Value>(&json) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) => {
                eprintln!("error: bindings file must contain a JSON object");
                return ExitCode::FAILURE;
            }
            Err(err) => {
                eprintln!("error: invalid JSON bindings: {err}");
                return ExitCode::FAILURE;
            }
        },
        Some(Err(err)) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
        None => serde_json::Map::new(),
    };

    let mut activation = MapActivation::new();
    for (name, json) in &bindings {
        env.declare_variable(name.clone(), CelType::Dyn);
        activation = activation.with(name.clone(), value_from_json(json));
    }

    let source = Source::new(code, file_path.clone());
    let checked = match compile(&source, &env) {
        Ok(checked) => checked,
        Err(issues) => {
            for issue in &issues {
                eprintln!("{}", issue.render_with_snippet(&source));
            }
            return ExitCode::FAILURE;
        }
    };

    let issues = run_validators(&checked, &env);
    let mut has_error = false;
    for issue in &issues {
        eprintln!("{}", issue.render_with_snippet(&source));
        has_error |= issue.severity == Severity::Error;
    }
    if has_error {
        return ExitCode::FAILURE;
    }

    let program = plan(&checked);
    match eval(&program, &env, &activation) {
        Ok(value) => {
            println!("{}", format_value(&value));
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("ERROR: {}: {:?}: {}", file_path, err.kind, err.message);
            ExitCode::FAILURE
        }
    }
}

fn read_file(file_path: &str) -> Result<String, String> {
    match fs::metadata(file_path) {
        Ok(metadata) if !metadata.is_file() => return Err(format!("{file_path} is not a file")),
        Ok(_) => {}
        Err(err) => return Err(format!("reading {file_path}: {err}")),
    }
    fs::read_to_string(file_path).map_err(|err| format!("reading {file_path}: {err}"))
}

/// Loads `cel.toml`'s `[options]` table, if the file is present. A missing
/// file is not an error: the CLI falls back to `CelOptions::default()`.
fn read_config(path: &str) -> Option<toml_edit::DocumentMut> {
    let text = fs::read_to_string(path).ok()?;
    match text.parse::<toml_edit::DocumentMut>() {
        Ok(doc) => Some(doc),
        Err(err) => {
            eprintln!("warning: ignoring malformed {path}: {err}");
            None
        }
    }
}

fn apply_config(env: &mut cel::Env, config: &toml_edit::DocumentMut) {
    let Some(options) = config.get("options").and_then(|item| item.as_table()) else {
        return;
    };
    if let Some(n) = options.get("comprehension_max_iterations").and_then(|v| v.as_integer()) {
        env.options.eval.comprehension_max_iterations = Some(n.max(0) as u64);
    }
    if let Some(n) = options.get("max_ast_depth").and_then(|v| v.as_integer()) {
        env.options.validator.max_ast_depth = Some(n.max(0) as usize);
    }
    if let Some(n) = options.get("max_comprehension_nesting").and_then(|v| v.as_integer()) {
        env.options.validator.max_comprehension_nesting = Some(n.max(0) as usize);
    }
    if let Some(b) = options.get("enable_heterogeneous_numeric_comparisons").and_then(|v| v.as_bool()) {
        env.options.checker.enable_heterogeneous_numeric_comparisons = b;
    }
}

/// Converts a JSON binding into a CEL runtime value. JSON has no distinct
/// int/uint/bytes/timestamp types, so every JSON number becomes a CEL
/// `double` unless it parses cleanly as an `i64`.
fn value_from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::String(s.as_str().into()),
        serde_json::Value::Array(items) => Value::List(std::rc::Rc::new(items.iter().map(value_from_json).collect())),
        serde_json::Value::Object(map) => {
            let mut entries = indexmap::IndexMap::new();
            for (k, v) in map {
                entries.insert(cel::value::MapKey::String(k.as_str().into()), value_from_json(v));
            }
            Value::Map(std::rc::Rc::new(entries))
        }
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::UInt(u) => format!("{u}u"),
        Value::Double(d) => d.to_string(),
        Value::String(s) => format!("{s:?}"),
        Value::Bytes(b) => format!("{b:?}"),
        Value::List(items) => format!("[{}]", items.iter().map(format_value).collect::<Vec<_>>().join(", ")),
        Value::Map(entries) => format!(
            "{{{}}}",
            entries.iter().map(|(k, v)| format!("{}: {}", format_value(&k.to_value()), format_value(v))).collect::<Vec<_>>().join(", ")
        ),
        Value::Message(msg) => format!("{}{{...}}", msg.type_name),
        Value::Timestamp(ts) => format!("timestamp(seconds={}, nanos={})", ts.seconds, ts.nanos),
        Value::Duration(d) => format!("duration(nanos={})", d.nanos),
        Value::Type(t) => format!("{t:?}"),
        Value::Optional(Some(v)) => format!("optional({})", format_value(v)),
        Value::Optional(None) => "optional.none()".to_owned(),
        Value::Unknown(paths) => format!("unknown({paths:?})"),
    }
}
