use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warp::{reject, Filter, Rejection, Reply};

use crate::collage_pipeline::{CollageOutput, CollagePipeline, CollageRequest};
use crate::collage_store::{is_valid_collage_id, CollageStore};
use crate::warp_helpers::{
    collage_rejection, with_pipeline, with_store, InternalError, NotFoundError,
};

#[derive(Debug, Default, Deserialize)]
pub struct CollageQuery {
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub time_range: Option<String>,
    pub grid_size: Option<i64>,
    pub show_labels: Option<bool>,
    /// Token handed over by the login redirect when no header is sent
    pub access_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CollageResponse {
    pub id: String,
    pub image_url: String,
    pub width: u32,
    pub height: u32,
    pub grid_size: u32,
    pub cell_size: u32,
    pub placeholders: usize,
    pub labels: Vec<Vec<String>>,
}

impl From<CollageOutput> for CollageResponse {
    fn from(output: CollageOutput) -> Self {
        Self {
            image_url: format!("/api/collages/{}/image", output.id),
            id: output.id,
            width: output.collage.width,
            height: output.collage.height,
            grid_size: output.collage.grid_size,
            cell_size: output.collage.cell_size,
            placeholders: output.placeholder_count,
            labels: output.label_rows,
        }
    }
}

/// Bearer token from the `Authorization` header, else the query parameter.
pub fn extract_credential(authorization: Option<&str>, query_token: Option<&str>) -> Option<String> {
    let from_header = authorization.and_then(|value| {
        let value = value.trim();
        let (scheme, token) = value.split_once(' ')?;
        scheme.eq_ignore_ascii_case("bearer").then(|| token.trim().to_string())
    });

    from_header
        .or_else(|| query_token.map(|t| t.trim().to_string()))
        .filter(|t| !t.is_empty())
}

/// Generate a collage for the caller's top items
pub async fn create_collage(
    query: CollageQuery,
    authorization: Option<String>,
    pipeline: Arc<CollagePipeline>,
) -> Result<impl Reply, Rejection> {
    let request = CollageRequest::parse(
        query.entity_type.as_deref(),
        query.time_range.as_deref(),
        query.grid_size,
        query.show_labels,
    )
    .map_err(collage_rejection)?;

    let credential = extract_credential(authorization.as_deref(), query.access_token.as_deref());

    match pipeline.run(&request, credential.as_deref()).await {
        Ok(output) => Ok(warp::reply::json(&CollageResponse::from(output))),
        Err(e) => {
            log::error!("Failed to generate collage: {}", e);
            Err(collage_rejection(e))
        }
    }
}

/// Get collage image file
pub async fn get_collage_image(
    id: String,
    store: Arc<dyn CollageStore>,
) -> Result<impl Reply, Rejection> {
    if !is_valid_collage_id(&id) {
        return Err(reject::custom(NotFoundError));
    }

    let contents = match store.load(&id) {
        Ok(Some(contents)) => contents,
        Ok(None) => {
            info!("Collage not found: {}", id);
            return Err(reject::custom(NotFoundError));
        }
        Err(e) => {
            log::error!("Failed to read collage {}: {}", id, e);
            return Err(reject::custom(InternalError {
                message: format!("Failed to read collage: {}", e),
            }));
        }
    };

    let reply = warp::reply::with_header(contents, "content-type", "image/png");
    let reply = warp::reply::with_header(reply, "cache-control", "private, max-age=3600");

    Ok(reply)
}

/// Build collage routes
pub fn build_collage_routes(
    pipeline: Arc<CollagePipeline>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let store = pipeline.store();

    let create = warp::path!("api" / "collage")
        .and(warp::get())
        .and(warp::query::<CollageQuery>())
        .and(warp::header::optional::<String>("authorization"))
        .and(with_pipeline(pipeline))
        .and_then(create_collage);

    let get_image = warp::path!("api" / "collages" / String / "image")
        .and(warp::get())
        .and(with_store(store))
        .and_then(get_collage_image);

    create.or(get_image)
}
