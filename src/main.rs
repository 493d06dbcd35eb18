#[tokio::main]
async fn main() {
    if let Err(error) = partyrelay::app::run().await {
        partyrelay::plog!("error: {}", error);
        std::process::exit(1);
    }
}
