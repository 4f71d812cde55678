fn main() {
    if let Err(err) = loadprep::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
