use std::env;
use std::process::exit;

#[tokio::main]
async fn main() {
    // RUST_LOG=debug shows every page
    env_logger::init();

    let exit_code = s3_flush::run(env::args_os()).await;

    exit(exit_code);
}
