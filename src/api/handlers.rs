use actix_web::{http::StatusCode, web, HttpResponse, Responder};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::pow::MiningError;
use crate::blockchain::{Address, Block, BlockError, Ledger, LedgerError, PrivateKey, Transaction};

/// Data structure for the ledger state
pub type LedgerData = web::Data<Ledger>;

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Human readable description
    pub error: String,

    /// The block that failed an integrity check, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u64>,
}

impl ErrorResponse {
    fn new(error: impl ToString) -> Self {
        ErrorResponse {
            error: error.to_string(),
            block_index: None,
        }
    }
}

/// Maps a ledger error to a status code and error body
fn ledger_error_response(err: &LedgerError) -> HttpResponse {
    let (status, block_index) = match err {
        LedgerError::ChainError(chain_err) => (StatusCode::BAD_REQUEST, Some(chain_err.block_index())),
        LedgerError::BlockNotFound(_) | LedgerError::TransactionNotFound { .. } => {
            (StatusCode::NOT_FOUND, None)
        }
        LedgerError::BlockError(BlockError::Mining(MiningError::Cancelled { .. })) => {
            (StatusCode::CONFLICT, None)
        }
        LedgerError::StorageError(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        _ => (StatusCode::BAD_REQUEST, None),
    };

    if status.is_server_error() {
        error!("Request failed: {}", err);
    }

    HttpResponse::build(status).json(ErrorResponse {
        error: err.to_string(),
        block_index,
    })
}

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// Leading zero bits required in every block hash
    pub difficulty: u8,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's private key, hex encoded; the sender address is derived from it
    pub private_key: String,

    /// The receiver's address
    pub receiver: String,

    /// The amount to transfer
    pub amount: u64,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// The signed transaction
    pub transaction: Transaction,

    /// The index of the block that will include this transaction
    pub block_index: u64,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,

    /// Hashes computed to find the nonce
    pub attempts: u64,
}

/// Response for the validate endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    /// Whether every block passed validation
    pub valid: bool,

    /// The first violation found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// The block that failed validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u64>,
}

/// Request for the create user endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct UserRequest {
    /// Display name of the user
    pub name: String,
}

/// Response for the create user endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub name: String,

    /// The user's address (public key)
    pub address: String,

    /// The user's private key (hex encoded)
    pub private_key: String,
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(ledger: LedgerData) -> impl Responder {
    let chain = ledger.chain();
    let is_valid = chain.validate().is_ok();

    HttpResponse::Ok().json(ChainResponse {
        length: chain.len(),
        difficulty: chain.difficulty(),
        chain: chain.blocks().to_vec(),
        is_valid,
    })
}

/// Get a block by index
#[utoipa::path(
    get,
    path = "/api/v1/blocks/{index}",
    params(
        ("index" = u64, Path, description = "Block index")
    ),
    responses(
        (status = 200, description = "Block found", body = Block),
        (status = 404, description = "No block at this index", body = ErrorResponse)
    )
)]
pub async fn get_block(ledger: LedgerData, index: web::Path<u64>) -> impl Responder {
    let index = index.into_inner();

    match ledger.block(index) {
        Some(block) => HttpResponse::Ok().json(block),
        None => ledger_error_response(&LedgerError::BlockNotFound(index)),
    }
}

/// Append an externally mined block
///
/// The block must link to the current tip and pass every integrity check
#[utoipa::path(
    post,
    path = "/api/v1/blocks",
    request_body = Block,
    responses(
        (status = 201, description = "Block appended", body = Block),
        (status = 400, description = "Block failed validation", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn append_block(ledger: LedgerData, block: web::Json<Block>) -> impl Responder {
    match ledger.append_block(block.into_inner()) {
        Ok(block) => HttpResponse::Created().json(block),
        Err(err) => {
            warn!("Rejected block: {}", err);
            ledger_error_response(&err)
        }
    }
}

/// Get a Merkle inclusion proof
///
/// Proves that the transaction at `position` is committed by the block's Merkle root
#[utoipa::path(
    get,
    path = "/api/v1/blocks/{index}/proof/{position}",
    params(
        ("index" = u64, Path, description = "Block index"),
        ("position" = usize, Path, description = "Transaction position within the block")
    ),
    responses(
        (status = 200, description = "Proof built", body = InclusionProof),
        (status = 404, description = "Block or transaction not found", body = ErrorResponse)
    )
)]
pub async fn get_inclusion_proof(
    ledger: LedgerData,
    path: web::Path<(u64, usize)>,
) -> impl Responder {
    let (index, position) = path.into_inner();

    match ledger.inclusion_proof(index, position) {
        Ok(proof) => HttpResponse::Ok().json(proof),
        Err(err) => ledger_error_response(&err),
    }
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(ledger: LedgerData) -> impl Responder {
    HttpResponse::Ok().json(ledger.pending_transactions())
}

/// Create a new transaction
///
/// Signs a payment with the given private key and adds it to the pending transactions
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction created successfully", body = TransactionResponse),
        (status = 400, description = "Invalid transaction data", body = ErrorResponse)
    )
)]
pub async fn new_transaction(
    ledger: LedgerData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let request = transaction_req.into_inner();

    let private_key = match PrivateKey::from_hex(&request.private_key) {
        Ok(key) => key,
        Err(_) => {
            return HttpResponse::BadRequest().json(ErrorResponse::new(
                "Invalid private key format. Must be a hex string.",
            ));
        }
    };

    let receiver = match request.receiver.parse::<Address>() {
        Ok(address) => address,
        Err(err) => {
            return HttpResponse::BadRequest()
                .json(ErrorResponse::new(format!("Invalid receiver address: {}", err)));
        }
    };

    match ledger.create_transaction(&private_key, receiver, request.amount) {
        Ok((transaction, block_index)) => HttpResponse::Created().json(TransactionResponse {
            message: format!("Transaction will be added to Block {}", block_index),
            transaction,
            block_index,
        }),
        Err(err) => ledger_error_response(&err),
    }
}

/// Mine a new block
///
/// Creates a new block with all pending transactions
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Nothing to mine or block rejected", body = ErrorResponse),
        (status = 409, description = "Mining was cancelled by a competing block", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn mine_block(ledger: LedgerData) -> impl Responder {
    // Proof of work is CPU bound, keep it off the async workers
    let ledger = ledger.into_inner();
    match web::block(move || ledger.mine_pending()).await {
        Ok(Ok(mined)) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Mined".to_string(),
            block: mined.block,
            attempts: mined.attempts,
        }),
        Ok(Err(err)) => ledger_error_response(&err),
        Err(err) => {
            error!("Mining task failed: {}", err);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Mining task failed"))
        }
    }
}

/// Check if the blockchain is valid
///
/// Replays every integrity check from genesis to tip
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = ValidationResponse)
    )
)]
pub async fn validate_chain(ledger: LedgerData) -> impl Responder {
    let response = match ledger.validate() {
        Ok(()) => ValidationResponse {
            valid: true,
            error: None,
            block_index: None,
        },
        Err(err) => ValidationResponse {
            valid: false,
            block_index: Some(err.block_index()),
            error: Some(err.to_string()),
        },
    };

    HttpResponse::Ok().json(response)
}

/// Create a new user
///
/// Creates a user with a random keypair
///
/// The private key is not kept by the server and must be stored by the caller
#[utoipa::path(
    post,
    path = "/api/v1/users/new",
    request_body = UserRequest,
    responses(
        (status = 201, description = "User created successfully", body = UserResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_user(ledger: LedgerData, user_req: web::Json<UserRequest>) -> impl Responder {
    match ledger.create_user(&user_req.name) {
        Ok(user) => HttpResponse::Created().json(UserResponse {
            name: user.name().to_string(),
            address: user.address().to_string(),
            private_key: user.export_private_key().to_hex(),
        }),
        Err(err) => {
            error!("Failed to create user: {}", err);
            HttpResponse::InternalServerError()
                .json(ErrorResponse::new(format!("Failed to create user: {}", err)))
        }
    }
}
