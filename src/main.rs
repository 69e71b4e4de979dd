fn main() {
    if let Err(err) = csv_refinery::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
