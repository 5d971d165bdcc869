use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use signed_ledger::api;
use signed_ledger::blockchain::{self, Ed25519, Ledger};
use signed_ledger::config::Config;

/// Opens the ledger described by `config`
///
/// # Arguments
///
/// * `config` - The loaded configuration
///
/// A stored chain that cannot be opened or fails validation is an error; the node
/// refuses to start rather than serve a replacement chain.
fn initialize_ledger(config: &Config) -> anyhow::Result<Ledger> {
    let mining = &config.mining;

    if !config.storage.enabled {
        warn!("Storage is disabled, the chain will not survive a restart");
        return Ledger::in_memory(mining.difficulty, mining.workers)
            .context("Failed to create genesis block");
    }

    let path = &config.storage.path;
    let ledger = Ledger::with_storage(path, mining.difficulty, mining.workers, Ed25519)
        .with_context(|| format!("Failed to load blockchain from storage at {}", path.display()))?;
    info!("Loaded blockchain from storage at {}", path.display());

    Ok(ledger)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_block,
        api::handlers::append_block,
        api::handlers::get_inclusion_proof,
        api::handlers::get_pending_transactions,
        api::handlers::new_transaction,
        api::handlers::mine_block,
        api::handlers::validate_chain,
        api::handlers::create_user
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::Address,
            blockchain::DigitalSignature,
            blockchain::MerkleProof,
            blockchain::merkle::ProofStep,
            blockchain::merkle::Side,
            blockchain::InclusionProof,
            api::handlers::ChainResponse,
            api::handlers::TransactionRequest,
            api::handlers::TransactionResponse,
            api::handlers::MineResponse,
            api::handlers::ValidationResponse,
            api::handlers::UserRequest,
            api::handlers::UserResponse,
            api::handlers::ErrorResponse
        )
    ),
    tags(
        (name = "ledger", description = "Signed ledger API endpoints")
    ),
    info(
        title = "Signed Ledger API",
        version = "0.1.0",
        description = "Signed transactions, Merkle commitments and a proof-of-work chain",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::load().context("Failed to load configuration")?;
    let ledger = web::Data::new(initialize_ledger(&config)?);

    info!(
        "Chain has {} blocks at difficulty {}, mining with {} workers",
        ledger.chain().len(),
        ledger.difficulty(),
        config.mining.workers
    );

    let (host, port) = (config.server.host.clone(), config.server.port);
    info!("Starting HTTP server at http://{}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(ledger.clone())
            .configure(api::configure_routes)
            .service(SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", openapi))
    })
    .bind((host.as_str(), port))
    .with_context(|| format!("Failed to bind {}:{}", host, port))?
    .run()
    .await
    .context("HTTP server failed")
}
