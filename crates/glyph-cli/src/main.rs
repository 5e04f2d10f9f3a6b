use std::{env, fs, process::ExitCode, time::Instant};

use glyph_rt::{Engine, EngineConfig};

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let file_path = if args.len() > 1 { &args[1] } else { "example.glyph" };
    let source = match fs::read_to_string(file_path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error reading {file_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let engine = Engine::new(&EngineConfig::new());
    let ctx = engine.create_context("Main");
    tracing::info!(file = file_path, "evaluating source file");

    let start = Instant::now();
    let result = engine.evaluate_expression_in_module(ctx, "Main", source.trim());
    let elapsed = start.elapsed();

    let exit = match result {
        Ok(value) => {
            println!("{value}");
            eprintln!("time taken: {elapsed:?}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error after {elapsed:?}: {err}");
            ExitCode::FAILURE
        }
    };

    engine.shutdown();
    exit
}
