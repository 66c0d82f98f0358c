pub fn setup_logger() {
    use std::io::Write;

    fn tn() -> String {
        std::thread::current().name().unwrap_or("unknown").to_owned()
    }

    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{:05} {:20} {:10} {}",
                record.level(),
                tn(),
                record
                    .module_path()
                    .and_then(|path| path.split("::").last())
                    .unwrap_or("?"),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info);

    if let Ok(env) = std::env::var("RUST_LOG") {
        builder.parse_filters(&env);
    }

    let _r = builder.try_init();
}

#[allow(dead_code)]
pub fn temporary_db() -> kical::Database {
    kical::Database::open(kical::Config::new().temporary(true)).unwrap()
}
