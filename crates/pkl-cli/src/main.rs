use std::{collections::HashMap, env, io::Write as _, path::Path, process::ExitCode};

use pkl::{Evaluator, EvaluatorOptions, OutputFormat, path_to_file_uri, render};

const USAGE: &str = "usage: pkl eval [-f FORMAT] [-x EXPRESSION] FILE
       pkl --help

Evaluates a Pkl module and renders it to stdout.

options:
  -f, --format FORMAT        output format (default: json)
  -x, --expression EXPR      evaluate an expression against the module
  -p, --property NAME=VALUE  set an external property (read via prop:)
";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    match run(&args) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("pkl: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> Result<ExitCode, String> {
    let mut format = OutputFormat::Json;
    let mut expression = None;
    let mut file = None;
    let mut properties = HashMap::new();

    let mut iter = args.iter();
    match iter.next().map(String::as_str) {
        Some("eval") => {}
        Some("--help" | "-h") | None => {
            print!("{USAGE}");
            return Ok(ExitCode::SUCCESS);
        }
        Some(other) => return Err(format!("unknown command `{other}`\n{USAGE}")),
    }
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-f" | "--format" => {
                let name = iter.next().ok_or("missing argument for --format")?;
                format = OutputFormat::parse(name).ok_or_else(|| {
                    format!(
                        "unknown format `{name}` (expected one of {})",
                        OutputFormat::NAMES.join(", ")
                    )
                })?;
            }
            "-x" | "--expression" => {
                expression = Some(iter.next().ok_or("missing argument for --expression")?.clone());
            }
            "-p" | "--property" => {
                let pair = iter.next().ok_or("missing argument for --property")?;
                let (name, value) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("malformed property `{pair}` (expected NAME=VALUE)"))?;
                properties.insert(name.to_owned(), value.to_owned());
            }
            "--help" | "-h" => {
                print!("{USAGE}");
                return Ok(ExitCode::SUCCESS);
            }
            other if other.starts_with('-') => return Err(format!("unknown option `{other}`")),
            other => {
                if file.replace(other.to_owned()).is_some() {
                    return Err("only one module can be evaluated at a time".to_owned());
                }
            }
        }
    }
    let Some(file) = file else {
        return Err(format!("no module given\n{USAGE}"));
    };

    let options = EvaluatorOptions {
        env_vars: env::vars().collect(),
        properties,
        ..EvaluatorOptions::default()
    };
    let mut evaluator = Evaluator::new(options);

    let uri = if file.contains(':') {
        file
    } else {
        path_to_file_uri(&Path::new(&file).canonicalize().map_err(|err| format!("{file}: {err}"))?)
    };

    let result = match &expression {
        Some(expr) => evaluator.evaluate_module_expression(&uri, expr),
        None => evaluator.evaluate_module(&uri),
    };
    let value = match result {
        Ok(value) => value,
        Err(err) => {
            eprintln!("{err}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let name = uri.rsplit(['/', ':']).next().unwrap_or("module").to_owned();
    match render::render(format, &value, &name, &uri) {
        Ok(bytes) => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes).map_err(|err| err.to_string())?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(ExitCode::FAILURE)
        }
    }
}
