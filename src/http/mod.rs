//! JSON over HTTP binding for [MarketEngine].
//!
//! Handlers are thin: every engine call is moved onto the blocking pool with `web::block` because
//! stores and sources do blocking IO. Errors are returned as `{"error": "..."}` with the status
//! chosen by the [ResponseError] impl on [MarketError].
use std::collections::BTreeMap;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::engine::MarketEngine;
use crate::error::{MarketError, MarketResult};
use crate::types::{PricePreview, PriceRecord, Step, Symbol};

#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HistoryResponse {
    pub symbol: Symbol,
    pub history: Vec<PriceRecord>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TimestepRequest {
    #[serde(default)]
    pub overrides: BTreeMap<Symbol, f64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PreviewTimestepResponse {
    pub current_step: Step,
    pub previews: Vec<PricePreview>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PreviewRequest {
    pub symbol: Symbol,
    pub drift: f64,
    pub volatility: f64,
    pub current_price: f64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PreviewResponse {
    pub symbol: Symbol,
    pub current_price: f64,
    pub calculated_price: f64,
    pub change_pct: f64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OverrideRequest {
    pub symbol: Symbol,
    pub price: f64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct InitializeResponse {
    pub initialized: bool,
}

impl ResponseError for MarketError {
    fn status_code(&self) -> StatusCode {
        match self {
            MarketError::ConcurrencyConflict => StatusCode::CONFLICT,
            MarketError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            MarketError::UnknownSymbol(_) => StatusCode::NOT_FOUND,
            MarketError::NoSymbolsAvailable => StatusCode::SERVICE_UNAVAILABLE,
            MarketError::Persistence(_) | MarketError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("HTTP: {}", self);
        }
        HttpResponse::build(status).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

/// An empty body means no overrides. Any other body has to parse.
fn parse_timestep_request(body: &[u8]) -> MarketResult<TimestepRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(TimestepRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        warn!("HTTP: Rejected timestep request: {}", e);
        MarketError::InvalidParameter(format!("timestep request: {}", e))
    })
}

async fn run<T, F>(engine: &web::Data<MarketEngine>, f: F) -> MarketResult<T>
where
    F: FnOnce(&MarketEngine) -> MarketResult<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = engine.clone();
    web::block(move || f(engine.get_ref()))
        .await
        .map_err(|e| MarketError::Internal(e.to_string()))?
}

pub mod server {
    use actix_web::{get, post, web};

    use super::{
        parse_timestep_request, run, HistoryQuery, HistoryResponse, InitializeResponse,
        OverrideRequest, PreviewRequest, PreviewResponse, PreviewTimestepResponse,
    };
    use crate::engine::MarketEngine;
    use crate::error::MarketError;
    use crate::types::{AdvanceOutcome, MarketSnapshot, MarketState, PriceOverride, PriceRecord};

    pub fn configure(cfg: &mut web::ServiceConfig) {
        cfg.service(market)
            .service(market_state)
            .service(history)
            .service(latest)
            .service(timestep)
            .service(preview_timestep)
            .service(preview_price)
            .service(override_price)
            .service(initialize)
            .service(unlock);
    }

    #[get("/market")]
    pub async fn market(
        app: web::Data<MarketEngine>,
    ) -> Result<web::Json<MarketSnapshot>, MarketError> {
        let snapshot = run(&app, |engine| engine.snapshot()).await?;
        Ok(web::Json(snapshot))
    }

    #[get("/market/state")]
    pub async fn market_state(
        app: web::Data<MarketEngine>,
    ) -> Result<web::Json<MarketState>, MarketError> {
        let state = run(&app, |engine| engine.market_state()).await?;
        Ok(web::Json(state))
    }

    #[get("/market/{symbol}/history")]
    pub async fn history(
        app: web::Data<MarketEngine>,
        path: web::Path<(String,)>,
        query: web::Query<HistoryQuery>,
    ) -> Result<web::Json<HistoryResponse>, MarketError> {
        let (symbol,) = path.into_inner();
        let limit = query.limit;
        let lookup = symbol.clone();
        let history = run(&app, move |engine| engine.history(&lookup, limit)).await?;
        Ok(web::Json(HistoryResponse { symbol, history }))
    }

    #[get("/market/{symbol}/latest")]
    pub async fn latest(
        app: web::Data<MarketEngine>,
        path: web::Path<(String,)>,
    ) -> Result<web::Json<PriceRecord>, MarketError> {
        let (symbol,) = path.into_inner();
        let record = run(&app, move |engine| {
            engine
                .latest_price(&symbol)?
                .ok_or(MarketError::UnknownSymbol(symbol))
        })
        .await?;
        Ok(web::Json(record))
    }

    #[post("/admin/timestep")]
    pub async fn timestep(
        app: web::Data<MarketEngine>,
        body: web::Bytes,
    ) -> Result<web::Json<AdvanceOutcome>, MarketError> {
        let overrides: Vec<PriceOverride> = parse_timestep_request(&body)?
            .overrides
            .into_iter()
            .map(|(symbol, price)| PriceOverride::new(symbol, price))
            .collect();
        let outcome = run(&app, move |engine| engine.advance_with(overrides)).await?;
        Ok(web::Json(outcome))
    }

    #[get("/admin/timestep/preview")]
    pub async fn preview_timestep(
        app: web::Data<MarketEngine>,
    ) -> Result<web::Json<PreviewTimestepResponse>, MarketError> {
        let res = run(&app, |engine| {
            let state = engine.market_state()?;
            let previews = engine.preview_timestep()?;
            Ok(PreviewTimestepResponse {
                current_step: state.current_step,
                previews,
            })
        })
        .await?;
        Ok(web::Json(res))
    }

    #[post("/admin/preview")]
    pub async fn preview_price(
        app: web::Data<MarketEngine>,
        request: web::Json<PreviewRequest>,
    ) -> Result<web::Json<PreviewResponse>, MarketError> {
        let req = request.into_inner();
        let calculated_price = run(&app, {
            let symbol = req.symbol.clone();
            move |engine| {
                engine.preview_next_price(&symbol, req.drift, req.volatility, req.current_price)
            }
        })
        .await?;
        Ok(web::Json(PreviewResponse {
            change_pct: (calculated_price - req.current_price) / req.current_price * 100.0,
            symbol: req.symbol,
            current_price: req.current_price,
            calculated_price,
        }))
    }

    #[post("/admin/override")]
    pub async fn override_price(
        app: web::Data<MarketEngine>,
        request: web::Json<OverrideRequest>,
    ) -> Result<web::Json<PriceRecord>, MarketError> {
        let req = request.into_inner();
        let record = run(&app, move |engine| engine.apply_override(&req.symbol, req.price)).await?;
        Ok(web::Json(record))
    }

    #[post("/admin/initialize")]
    pub async fn initialize(
        app: web::Data<MarketEngine>,
    ) -> Result<web::Json<InitializeResponse>, MarketError> {
        let initialized = run(&app, |engine| engine.initialize_market()).await?;
        Ok(web::Json(InitializeResponse { initialized }))
    }

    #[post("/admin/unlock")]
    pub async fn unlock(
        app: web::Data<MarketEngine>,
    ) -> Result<web::Json<MarketState>, MarketError> {
        let state = run(&app, |engine| {
            engine.clear_generation_lock()?;
            engine.market_state()
        })
        .await?;
        Ok(web::Json(state))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::http::StatusCode;
    use actix_web::{test, web, App};

    use super::server::configure;
    use super::{
        ErrorResponse, HistoryResponse, InitializeResponse, OverrideRequest, PreviewRequest,
        PreviewResponse, PreviewTimestepResponse,
    };
    use crate::engine::MarketEngine;
    use crate::model::PriceModel;
    use crate::source::sample::SampleSource;
    use crate::store::memory::MemoryStore;
    use crate::types::{AdvanceOutcome, Company, MarketSnapshot, MarketState, PriceRecord};

    fn engine() -> web::Data<MarketEngine> {
        let companies = vec![
            Company::new("A", "Alpha", 100.0, 0.0, 0.0),
            Company::new("B", "Beta", 50.0, 0.0, 0.0),
        ];
        web::Data::new(MarketEngine::with_model(
            Arc::new(MemoryStore::new()),
            Box::new(SampleSource::with_companies(companies)),
            PriceModel::seeded(7),
        ))
    }

    #[actix_web::test]
    async fn test_timestep_loop() {
        let market = engine();
        let app =
            test::init_service(App::new().app_data(market.clone()).configure(configure)).await;

        let req = test::TestRequest::post().uri("/admin/initialize").to_request();
        let resp: InitializeResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.initialized);

        let req = test::TestRequest::post().uri("/admin/timestep").to_request();
        let resp: AdvanceOutcome = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.step, 1);

        let req = test::TestRequest::post()
            .uri("/admin/timestep")
            .set_json(serde_json::json!({"overrides": {"A": 150.0}}))
            .to_request();
        let resp: AdvanceOutcome = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.step, 2);
        assert_eq!(resp.overrides_applied, 1);

        let req = test::TestRequest::get().uri("/market").to_request();
        let snapshot: MarketSnapshot = test::call_and_read_body_json(&app, req).await;
        assert_eq!(snapshot.step, 2);
        assert_eq!(snapshot.prices.get("A"), Some(&150.0));
        assert_eq!(snapshot.prices.get("B"), Some(&50.0));

        let req = test::TestRequest::get()
            .uri("/market/A/history?limit=2")
            .to_request();
        let resp: HistoryResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.history.len(), 2);
        assert_eq!(resp.history[1].step, 2);
        assert!(resp.history[1].is_override);

        let req = test::TestRequest::get().uri("/market/B/latest").to_request();
        let resp: PriceRecord = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.step, 2);

        let req = test::TestRequest::get().uri("/market/state").to_request();
        let resp: MarketState = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.current_step, 2);
        assert!(!resp.is_generating);
    }

    #[actix_web::test]
    async fn test_that_held_lock_returns_conflict() {
        let market = engine();
        assert!(market.store().try_lock_generation().unwrap());
        let app =
            test::init_service(App::new().app_data(market.clone()).configure(configure)).await;

        let req = test::TestRequest::post().uri("/admin/timestep").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "generation already in progress");

        let req = test::TestRequest::post().uri("/admin/unlock").to_request();
        let resp: MarketState = test::call_and_read_body_json(&app, req).await;
        assert!(!resp.is_generating);

        let req = test::TestRequest::post().uri("/admin/timestep").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_error_statuses() {
        let market = engine();
        let app =
            test::init_service(App::new().app_data(market.clone()).configure(configure)).await;
        let req = test::TestRequest::post().uri("/admin/initialize").to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get().uri("/market/ZZZ/latest").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/admin/override")
            .set_json(OverrideRequest {
                symbol: "ZZZ".to_string(),
                price: 10.0,
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/admin/preview")
            .set_json(PreviewRequest {
                symbol: "A".to_string(),
                drift: 0.0,
                volatility: 0.1,
                current_price: -1.0,
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_that_malformed_timestep_body_does_not_advance() {
        let market = engine();
        let app =
            test::init_service(App::new().app_data(market.clone()).configure(configure)).await;
        let req = test::TestRequest::post().uri("/admin/initialize").to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/admin/timestep")
            .insert_header(("content-type", "application/json"))
            .set_payload(r#"{"overrides":{"A":"150"}}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert!(body.error.starts_with("invalid parameter"));

        assert_eq!(market.market_state().unwrap().current_step, 0);
        assert!(!market.store().is_generation_locked().unwrap());
        let latest = market.latest_price("A").unwrap().unwrap();
        assert_eq!(latest.step, 0);
        assert!(!latest.is_override);

        //An empty body is still a plain advance
        let req = test::TestRequest::post()
            .uri("/admin/timestep")
            .insert_header(("content-type", "application/json"))
            .to_request();
        let resp: AdvanceOutcome = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.step, 1);
        assert_eq!(resp.overrides_applied, 0);
    }

    #[actix_web::test]
    async fn test_that_empty_market_is_unavailable() {
        let market = web::Data::new(MarketEngine::with_model(
            Arc::new(MemoryStore::new()),
            Box::new(SampleSource::with_companies(Vec::new())),
            PriceModel::seeded(7),
        ));
        let app =
            test::init_service(App::new().app_data(market.clone()).configure(configure)).await;

        let req = test::TestRequest::post().uri("/admin/timestep").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!market.store().is_generation_locked().unwrap());
    }

    #[actix_web::test]
    async fn test_admin_previews_and_override() {
        let market = engine();
        let app =
            test::init_service(App::new().app_data(market.clone()).configure(configure)).await;
        let req = test::TestRequest::post().uri("/admin/initialize").to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get()
            .uri("/admin/timestep/preview")
            .to_request();
        let resp: PreviewTimestepResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.current_step, 0);
        assert_eq!(resp.previews.len(), 2);

        let req = test::TestRequest::post()
            .uri("/admin/preview")
            .set_json(PreviewRequest {
                symbol: "A".to_string(),
                drift: 0.0,
                volatility: 0.0,
                current_price: 80.0,
            })
            .to_request();
        let resp: PreviewResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.calculated_price, 80.0);
        assert_eq!(resp.change_pct, 0.0);

        let req = test::TestRequest::post()
            .uri("/admin/override")
            .set_json(OverrideRequest {
                symbol: "B".to_string(),
                price: 64.0,
            })
            .to_request();
        let resp: PriceRecord = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.step, 0);
        assert!(resp.is_override);

        let req = test::TestRequest::get().uri("/market").to_request();
        let snapshot: MarketSnapshot = test::call_and_read_body_json(&app, req).await;
        assert_eq!(snapshot.prices.get("B"), Some(&64.0));
        assert_eq!(market.market_state().unwrap().current_step, 0);
    }
}
