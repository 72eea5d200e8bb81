use log::error;

#[tokio::main]
async fn main() {
    if let Err(err) = powermon::app().await {
        error!("{:#}", err);
        std::process::exit(255);
    }
}
