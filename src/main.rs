fn main() {
    if let Err(err) = housing_ingest::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
