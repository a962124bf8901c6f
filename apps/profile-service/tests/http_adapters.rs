use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use ce_outbox::{CloudEvent, NewEvent, Relay, RelayContext, RelayError};
use chrono::Utc;
use profile_service::relay_http::{CLOUDEVENTS_BATCH_CONTENT_TYPE, HttpRelay};
use profile_service::tenant::{HttpTenantDirectory, Tenant, TenantDirectory, TenantError};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

async fn spawn_http_server(app: Router) -> Result<(String, oneshot::Sender<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let _ = server.await;
    });
    Ok((format!("http://{addr}"), shutdown_tx))
}

fn events(count: usize) -> Result<Vec<CloudEvent>> {
    (0..count)
        .map(|index| -> Result<CloudEvent> {
            Ok(NewEvent::new("/test", "test.event", vec![index as u8]).seal(None)?)
        })
        .collect()
}

#[tokio::test]
async fn tenant_directory_reads_known_tenants_and_maps_404() -> Result<()> {
    let known = Uuid::now_v7();
    let expire = Utc::now();
    let app = Router::new().route(
        "/tenants/:id",
        get(move |Path(id): Path<Uuid>| async move {
            if id == known {
                (
                    StatusCode::OK,
                    Json(json!({ "id": id, "name": "acme", "expire": expire })),
                )
                    .into_response()
            } else {
                StatusCode::NOT_FOUND.into_response()
            }
        }),
    );
    let (base_url, shutdown) = spawn_http_server(app).await?;
    let directory = HttpTenantDirectory::new(format!("{base_url}/"), Duration::from_secs(2));

    let tenant = directory
        .fetch_tenant(known)
        .await?
        .context("known tenant")?;
    assert_eq!(
        tenant,
        Tenant {
            id: known,
            name: "acme".to_string(),
            expire: Some(expire),
        }
    );
    assert_eq!(directory.fetch_tenant(Uuid::now_v7()).await?, None);

    let _ = shutdown.send(());
    Ok(())
}

#[tokio::test]
async fn tenant_directory_reports_server_errors_as_unavailable() -> Result<()> {
    let app = Router::new().route(
        "/tenants/:id",
        get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    );
    let (base_url, shutdown) = spawn_http_server(app).await?;
    let directory = HttpTenantDirectory::new(base_url, Duration::from_secs(2));

    let error = directory
        .fetch_tenant(Uuid::now_v7())
        .await
        .err()
        .context("503 must fail")?;
    assert!(matches!(error, TenantError::Unavailable(_)), "{error:?}");

    let _ = shutdown.send(());
    Ok(())
}

#[derive(Clone, Default)]
struct SinkState {
    content_types: Arc<Mutex<Vec<String>>>,
    batches: Arc<Mutex<Vec<Vec<Value>>>>,
}

async fn accept_all(
    State(state): State<SinkState>,
    headers: HeaderMap,
    Json(batch): Json<Vec<Value>>,
) -> StatusCode {
    let content_type = headers
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.content_types.lock().await.push(content_type);
    state.batches.lock().await.push(batch);
    StatusCode::ACCEPTED
}

#[tokio::test]
async fn http_relay_posts_a_cloudevents_batch() -> Result<()> {
    let state = SinkState::default();
    let app = Router::new()
        .route("/events", post(accept_all))
        .with_state(state.clone());
    let (base_url, shutdown) = spawn_http_server(app).await?;

    let relay = HttpRelay::new(format!("{base_url}/events"), Duration::from_secs(2));
    let batch = events(3)?;
    let context = RelayContext::new(CancellationToken::new(), 1);
    relay.relay(&context, &batch).await?;

    assert_eq!(
        state.content_types.lock().await.as_slice(),
        [CLOUDEVENTS_BATCH_CONTENT_TYPE.to_string()]
    );
    let received = state.batches.lock().await.clone();
    let [received] = received.as_slice() else {
        anyhow::bail!("expected one batch, got {}", received.len());
    };
    let ids: Vec<&str> = received
        .iter()
        .filter_map(|event| event.get("id").and_then(Value::as_str))
        .collect();
    let expected: Vec<&str> = batch.iter().map(|event| event.id.as_str()).collect();
    assert_eq!(ids, expected);
    assert!(
        received
            .iter()
            .all(|event| event.get("specversion") == Some(&json!("1.0")))
    );

    let _ = shutdown.send(());
    Ok(())
}

#[tokio::test]
async fn http_relay_maps_multi_status_to_partial_failure() -> Result<()> {
    let batch = events(4)?;
    let rejected = vec![batch[1].id.clone(), batch[3].id.clone()];
    let body = json!({ "failed": rejected.clone() });
    let app = Router::new().route(
        "/events",
        post(move || {
            let body = body.clone();
            async move { (StatusCode::MULTI_STATUS, Json(body)) }
        }),
    );
    let (base_url, shutdown) = spawn_http_server(app).await?;

    let relay = HttpRelay::new(format!("{base_url}/events"), Duration::from_secs(2));
    let context = RelayContext::new(CancellationToken::new(), 1);
    match relay.relay(&context, &batch).await {
        Err(RelayError::Partial(errors)) => {
            let failed: Vec<String> = errors.event_ids().map(ToString::to_string).collect();
            assert_eq!(failed, rejected);
        }
        other => anyhow::bail!("expected a partial failure, got {other:?}"),
    }

    let _ = shutdown.send(());
    Ok(())
}

#[tokio::test]
async fn http_relay_fails_the_batch_on_error_status() -> Result<()> {
    let app = Router::new().route(
        "/events",
        post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
    );
    let (base_url, shutdown) = spawn_http_server(app).await?;

    let relay = HttpRelay::new(format!("{base_url}/events"), Duration::from_secs(2));
    let context = RelayContext::new(CancellationToken::new(), 1);
    match relay.relay(&context, &events(2)?).await {
        Err(RelayError::Failed(message)) => assert!(message.contains("502"), "{message}"),
        other => anyhow::bail!("expected a failed batch, got {other:?}"),
    }

    let _ = shutdown.send(());
    Ok(())
}

#[tokio::test]
async fn http_relay_gives_up_when_cancelled() -> Result<()> {
    let app = Router::new().route(
        "/events",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            StatusCode::OK
        }),
    );
    let (base_url, shutdown) = spawn_http_server(app).await?;

    let relay = HttpRelay::new(format!("{base_url}/events"), Duration::from_secs(60));
    let cancel = CancellationToken::new();
    let context = RelayContext::new(cancel.clone(), 1);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });
    let result = tokio::time::timeout(Duration::from_secs(5), relay.relay(&context, &events(1)?))
        .await
        .context("relay must return once cancelled")?;
    assert!(matches!(result, Err(RelayError::Failed(_))), "{result:?}");

    let _ = shutdown.send(());
    Ok(())
}
