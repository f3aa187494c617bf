use std::env;

use actix_web::{web, App, HttpServer};
use log::{error, info};

use kairos::config::MarketConfig;
use kairos::http::server::configure;

fn main() -> std::io::Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    let config = MarketConfig::from_env_and_args(&args)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{:#}", e)))?;

    //Sources may use a blocking HTTP client, so startup loading happens before the runtime exists
    let engine = config
        .build_engine()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("{:#}", e)))?;
    if let Err(e) = engine.load_companies() {
        error!("SERVER: Failed to load companies: {}", e);
    }
    match engine.initialize_market() {
        Ok(true) => info!("SERVER: Market initialized"),
        Ok(false) => info!("SERVER: Resuming existing market"),
        Err(e) => error!("SERVER: Failed to initialize market: {}", e),
    }

    let market = web::Data::new(engine);
    let address = config.address.clone();
    let port = config.port;
    info!("SERVER: Listening on {}:{}", address, port);

    actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || App::new().app_data(market.clone()).configure(configure))
            .bind((address, port))?
            .run()
            .await
    })
}
