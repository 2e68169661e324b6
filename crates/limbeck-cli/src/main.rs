fn main() {
    if let Err(err) = limbeck_cli::run_from_env() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
