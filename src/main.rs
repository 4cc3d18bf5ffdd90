fn is_json_mode_args() -> bool {
    std::env::args().any(|arg| arg == "--json")
}

fn report(err: &qdev_exporter::CliError) {
    if is_json_mode_args() {
        eprintln!("{}", err.to_json());
    } else {
        eprintln!("error: {err}");
    }
}

fn main() {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let raw_args: Vec<String> = std::env::args().collect();
    let parsed = match qdev_exporter::parse_cli(raw_args) {
        Ok(parsed) => parsed,
        Err(err) => {
            report(&err);
            std::process::exit(err.code);
        }
    };

    if let Err(err) = qdev_exporter::run_with_parsed(parsed) {
        report(&err);
        std::process::exit(err.code);
    }
}
