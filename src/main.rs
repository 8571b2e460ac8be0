fn main() {
    if let Err(err) = admission_ingest::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
