mod cors;
mod sweep;

use std::{sync::Arc, time::Duration};

use actix_web::{
    App, HttpServer,
    web::{self},
};
use api_pay::{
    PayContext, PaySettings,
    gateway::{PaymentGateway, pesapal::PesapalClient, stripe_checkout::StripeCheckout},
};
use common::{
    env_config::{Config, PaymentProvider},
    storage::FileStore,
};
use db::{PgStore, Store};
use notifier::{Notifier, events::Broadcaster, mail};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // get env vars
    let config = Config::from_env();
    let config_data = config.clone();
    let origin = config.cors_allowed_origin.clone();

    // init logger
    logger::setup(&config.log_file).expect("Failed to set up logger");

    // init db connection
    let pool = db::setup(&config.database_url, config.is_production())
        .await
        .expect("Failed to set up database");
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    let files = FileStore::new(config.upload_dir.clone());
    let notifier = Notifier::new(
        Arc::from(mail::mailer_from_config(&config.mail)),
        Broadcaster::default(),
        config.mail.notify_email.clone(),
    );

    let gateway: Arc<dyn PaymentGateway> = match config.payment.provider {
        PaymentProvider::Pesapal => Arc::new(
            PesapalClient::new(
                &config.pesapal,
                Duration::from_secs(config.payment.gateway_timeout_secs),
            )
            .expect("Failed to build Pesapal client"),
        ),
        PaymentProvider::Stripe => Arc::new(StripeCheckout::new(&config.stripe_secret_key)),
    };
    log::info!("Payments go through {}", gateway.name());

    let pay = web::Data::new(PayContext {
        store: store.clone(),
        gateway,
        notifier: notifier.clone(),
        files: files.clone(),
        settings: PaySettings::from_config(&config),
    });

    actix_web::rt::spawn(sweep::run_sweep_loop(
        store.clone(),
        files.clone(),
        config.sweep.clone(),
    ));

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(store.clone()))
            .app_data(web::Data::new(config_data.clone()))
            .app_data(web::Data::new(files.clone()))
            .app_data(web::Data::new(notifier.clone()))
            .app_data(pay.clone())
            .wrap(logger::middleware(config_data.console_logging_enabled)) // 3rd
            .wrap(extractor::middleware()) // 2nd
            .wrap(cors::middleware(&origin)) // 1st
            .service(
                web::scope("/api")
                    .service(api_auth::mount_auth())
                    .service(api_pay::mount_webhook())
                    .service(
                        web::scope("/dashboard")
                            .wrap(api_auth::auth_middleware())
                            .service(api_auth::mount_session())
                            .service(api_auth::mount_users())
                            .service(api_jobs::mount_jobs())
                            .service(api_messages::mount_messages())
                            .service(api_pay::mount_pay())
                            .service(notifier::mount_events()),
                    ),
            )
    })
    .bind((config.server_host.as_str(), config.server_port))?
    .workers(config.num_workers)
    .run()
    .await
}
