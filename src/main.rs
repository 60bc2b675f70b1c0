fn main() {
    if let Err(e) = medsync_lib::run() {
        eprintln!("medsync: {e}");
        std::process::exit(1);
    }
}
