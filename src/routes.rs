use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::media;
use crate::models::{Language, Listing, Organization, ProductDraft, Seller, StyleSelection};
use crate::session::SessionView;
use crate::store::MemoryStore;
use crate::wizard::UploadWizard;

#[derive(Clone)]
pub struct AppState {
    pub wizard: UploadWizard,
    /// Public bucket behind `MEDIA_PUBLIC_BASE`; published media URLs resolve here.
    pub media: Arc<MemoryStore>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub seller: Seller,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct FormRequest {
    /// Bare base64 or a data URL.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub draft: Option<ProductDraft>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrganizationRequest {
    pub owner_id: String,
    pub name: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(close_session))
        .route("/api/sessions/:id/form", post(submit_form))
        .route("/api/sessions/:id/refine/skip", post(skip_refine))
        .route("/api/sessions/:id/generate", post(generate_image))
        .route("/api/sessions/:id/back", post(back_to_style))
        .route("/api/sessions/:id/video", post(start_video).get(get_video))
        .route("/api/sessions/:id/image", get(get_image))
        .route("/api/sessions/:id/publish", post(publish))
        .route("/api/listings", get(list_listings))
        .route("/api/listings/:id", delete(delete_listing))
        .route("/api/sellers/:seller_id/listings", get(seller_listings))
        .route("/api/organizations", post(create_organization))
        .route("/api/organizations/:owner_id", get(list_organizations))
        .route("/media/*path", get(get_media))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

pub async fn create_session(State(state): State<AppState>, Json(body): Json<CreateSessionRequest>) -> Result<(StatusCode, Json<SessionView>), PipelineError> {
    let view = state.wizard.create_session(body.seller, body.language, body.organization_id).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<SessionView>, PipelineError> {
    state.wizard.view(id).map(Json)
}

pub async fn close_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> StatusCode {
    if state.wizard.close(id) { StatusCode::NO_CONTENT } else { StatusCode::NOT_FOUND }
}

pub async fn submit_form(Path(id): Path<Uuid>, State(state): State<AppState>, Json(body): Json<FormRequest>) -> Result<Json<SessionView>, PipelineError> {
    state.wizard.update_form(id, body.image.as_deref(), body.draft)?;
    tracing::info!("📝 Form submitted for session {}", id);
    state.wizard.submit_form(id).await.map(Json)
}

pub async fn skip_refine(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<SessionView>, PipelineError> {
    state.wizard.skip_refine(id).map(Json)
}

pub async fn generate_image(Path(id): Path<Uuid>, State(state): State<AppState>, Json(body): Json<StyleSelection>) -> Result<Json<SessionView>, PipelineError> {
    tracing::info!("🎨 Generating '{}' image for session {}", body.style, id);
    state.wizard.generate_image(id, body).await.map(Json)
}

pub async fn back_to_style(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<SessionView>, PipelineError> {
    state.wizard.back_to_style(id).map(Json)
}

pub async fn start_video(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<(StatusCode, Json<SessionView>), PipelineError> {
    let (view, _task) = state.wizard.start_video(id)?;
    Ok((StatusCode::ACCEPTED, Json(view)))
}

pub async fn get_video(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Response, PipelineError> {
    Ok(match state.wizard.video(id)? {
        Some(video) => ([(header::CONTENT_TYPE, video.mime_type)], video.bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    })
}

pub async fn get_image(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Response, PipelineError> {
    Ok(match state.wizard.generated_asset(id)? {
        Some(asset) => {
            let data = media::decode(&asset.image_base64)?;
            let mime = media::sniff_image_mime(&data);
            ([(header::CONTENT_TYPE, mime)], data).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    })
}

pub async fn publish(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<SessionView>, PipelineError> {
    state.wizard.publish(id).await.map(Json)
}

pub async fn list_listings(State(state): State<AppState>) -> Result<Json<Vec<Listing>>, PipelineError> {
    state.wizard.store().list_listings().await.map(Json)
}

pub async fn seller_listings(Path(seller_id): Path<String>, State(state): State<AppState>) -> Result<Json<Vec<Listing>>, PipelineError> {
    state.wizard.store().seller_listings(&seller_id).await.map(Json)
}

pub async fn delete_listing(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, PipelineError> {
    state.wizard.store().delete_listing(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_organizations(Path(owner_id): Path<String>, State(state): State<AppState>) -> Result<Json<Vec<Organization>>, PipelineError> {
    state.wizard.store().organizations(&owner_id).await.map(Json)
}

pub async fn create_organization(State(state): State<AppState>, Json(body): Json<CreateOrganizationRequest>) -> Result<(StatusCode, Json<Organization>), PipelineError> {
    let org = state.wizard.store().create_organization(&body.name, &body.owner_id).await?;
    Ok((StatusCode::CREATED, Json(org)))
}

pub async fn get_media(Path(path): Path<String>, State(state): State<AppState>) -> Response {
    match state.media.media(&path) {
        Some(stored) => ([(header::CONTENT_TYPE, stored.content_type)], stored.data).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeModel;
    use crate::media::encode_bytes;
    use crate::pipeline::Pipeline;
    use crate::config::PipelineConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

    fn app() -> Router {
        let model = Arc::new(FakeModel::new().with_image(encode_bytes(PNG)));
        let store = Arc::new(MemoryStore::new("http://localhost:8080/media"));
        let pipeline = Pipeline::new(PipelineConfig::new("test-key"), model).unwrap();
        router(AppState { wizard: UploadWizard::new(Arc::new(pipeline), store.clone()), media: store })
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request.header(header::CONTENT_TYPE, "application/json").body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn new_session(app: &Router) -> String {
        let (status, body) = call(app, "POST", "/api/sessions", Some(json!({ "seller": { "id": "s1", "name": "Amira" } }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["step"], "upload_form");
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let app = app();
        let (status, body) = call(&app, "GET", &format!("/api/sessions/{}", Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn incomplete_form_is_rejected() {
        let app = app();
        let id = new_session(&app).await;
        let (status, body) = call(&app, "POST", &format!("/api/sessions/{id}/form"), Some(json!({ "draft": { "title": "Lamp", "price": 50.0 } }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["message"].as_str().unwrap().contains("required fields"));

        let (_, view) = call(&app, "GET", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(view["step"], "upload_form");
    }

    #[tokio::test]
    async fn publish_out_of_order_is_conflict() {
        let app = app();
        let id = new_session(&app).await;
        let (status, _) = call(&app, "POST", &format!("/api/sessions/{id}/publish"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn full_flow_over_http() {
        let app = app();
        let id = new_session(&app).await;

        let form = json!({
            "image": "data:image/jpeg;base64,/9j/4AAQSkZJRgABAQ==",
            "draft": { "title": "Lamp", "price": 50.0 }
        });
        let (status, view) = call(&app, "POST", &format!("/api/sessions/{id}/form"), Some(form)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["step"], "style");
        assert_eq!(view["draft"]["title"], "Lamp");

        let (status, view) = call(&app, "POST", &format!("/api/sessions/{id}/generate"), Some(json!({ "style": "studio" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["step"], "review");
        assert_eq!(view["has_generated_image"], true);

        let response = app
            .clone()
            .oneshot(Request::builder().uri(format!("/api/sessions/{id}/image")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

        let (status, view) = call(&app, "POST", &format!("/api/sessions/{id}/publish"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["step"], "done");

        let (_, listings) = call(&app, "GET", "/api/sellers/s1/listings", None).await;
        assert_eq!(listings.as_array().unwrap().len(), 1);
        assert_eq!(listings[0]["price"], 50.0);

        let image_url = listings[0]["image_url"].as_str().unwrap();
        let media_path = image_url.trim_start_matches("http://localhost:8080");
        let response = app.clone().oneshot(Request::builder().uri(media_path).body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
