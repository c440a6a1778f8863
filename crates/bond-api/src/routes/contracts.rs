use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use bond_common::{BondId, Contract, ContractId};
use bond_engine::{ContractView, QuorumState, SignOutcome};
use serde::{Deserialize, Serialize};

use super::{parse_id, ApiJson};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct CreateContractRequest {
    pub title: String,
    #[serde(default)]
    pub terms: String,
    /// Open the contract for signatures right away
    #[serde(default)]
    pub propose: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct SignRequest {
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub contract: Contract,
    pub quorum: QuorumState,
    pub activated: bool,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route(
            "/bonds/:bond_id/contracts",
            get(list_contracts).post(create_contract),
        )
        .route(
            "/contracts/:contract_id",
            get(get_contract).delete(delete_contract),
        )
        .route("/contracts/:contract_id/request-signatures", post(request_signatures))
        .route("/contracts/:contract_id/sign", post(sign_contract))
        .route("/contracts/:contract_id/evaluate", post(evaluate_contract))
        .route("/contracts/:contract_id/void", post(void_contract))
}

async fn create_contract(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(bond_id): Path<String>,
    ApiJson(request): ApiJson<CreateContractRequest>,
) -> ApiResult<(StatusCode, Json<Contract>)> {
    let bond_id: BondId = parse_id(&bond_id, "bond")?;
    let contract = if request.propose {
        state
            .engine
            .propose_contract(&bond_id, &user, &request.title, &request.terms)
            .await?
    } else {
        state
            .engine
            .create_contract(&bond_id, &user, &request.title, &request.terms)
            .await?
    };
    Ok((StatusCode::CREATED, Json(contract)))
}

async fn list_contracts(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(bond_id): Path<String>,
) -> ApiResult<Json<Vec<Contract>>> {
    let bond_id: BondId = parse_id(&bond_id, "bond")?;
    Ok(Json(state.engine.list_contracts(&bond_id, &user).await?))
}

async fn get_contract(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(contract_id): Path<String>,
) -> ApiResult<Json<ContractView>> {
    let contract_id: ContractId = parse_id(&contract_id, "contract")?;
    Ok(Json(state.engine.contract_status(&contract_id, &user).await?))
}

async fn delete_contract(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(contract_id): Path<String>,
) -> ApiResult<StatusCode> {
    let contract_id: ContractId = parse_id(&contract_id, "contract")?;
    state.engine.delete_contract(&contract_id, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn request_signatures(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(contract_id): Path<String>,
) -> ApiResult<Json<Contract>> {
    let contract_id: ContractId = parse_id(&contract_id, "contract")?;
    Ok(Json(state.engine.request_signatures(&contract_id, &user).await?))
}

async fn sign_contract(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(contract_id): Path<String>,
    ApiJson(request): ApiJson<SignRequest>,
) -> ApiResult<Json<SignOutcome>> {
    let contract_id: ContractId = parse_id(&contract_id, "contract")?;
    let outcome = state
        .engine
        .submit_signature(&contract_id, &user, request.payload)
        .await?;
    Ok(Json(outcome))
}

async fn evaluate_contract(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(contract_id): Path<String>,
) -> ApiResult<Json<EvaluateResponse>> {
    let contract_id: ContractId = parse_id(&contract_id, "contract")?;
    let outcome = state.engine.evaluate_quorum_as(&contract_id, &user).await?;
    Ok(Json(EvaluateResponse {
        contract: outcome.contract,
        quorum: outcome.quorum,
        activated: outcome.activated,
    }))
}

async fn void_contract(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(contract_id): Path<String>,
) -> ApiResult<Json<Contract>> {
    let contract_id: ContractId = parse_id(&contract_id, "contract")?;
    Ok(Json(state.engine.void_contract(&contract_id, &user).await?))
}
