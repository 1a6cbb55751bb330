use actix_cors::Cors;
use actix_web::{
    get, http::StatusCode, post, web, App, HttpResponse, HttpServer, Responder,
    Result as ActixResult,
};
use actix_ws::Message;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use wfcore::{
    ExecutionError, FlowError, TriggerEvent, TriggerType, Value, WorkflowDefinition, WorkflowError,
};
use wfruntime::{FlowRuntime, RuntimeConfig};

/// Application state shared across handlers
struct AppState {
    runtime: Arc<FlowRuntime>,
}

/// Request body for starting an execution
#[derive(Debug, Deserialize)]
struct CreateExecutionRequest {
    workflow_id: Uuid,
    #[serde(default)]
    trigger_type: TriggerType,
    #[serde(default)]
    triggered_by: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
struct EventFilter {
    execution_id: Option<Uuid>,
}

/// Response for workflow creation
#[derive(Debug, Serialize)]
struct WorkflowResponse {
    id: Uuid,
    message: String,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn status_for(err: &FlowError) -> StatusCode {
    match err {
        FlowError::Workflow(WorkflowError::NotFound(_))
        | FlowError::Execution(ExecutionError::NotFound(_)) => StatusCode::NOT_FOUND,
        FlowError::Execution(
            ExecutionError::AlreadyTerminal { .. } | ExecutionError::AlreadyRunning(_),
        ) => StatusCode::CONFLICT,
        FlowError::Workflow(_) | FlowError::Serialization(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: impl Into<FlowError>) -> HttpResponse {
    let err = err.into();
    let status = status_for(&err);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    HttpResponse::build(status).json(ErrorResponse { error: err.to_string() })
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "wfserver"
    }))
}

/// List all workflows
#[get("/api/workflows")]
async fn list_workflows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let workflow_list: Vec<_> = data
        .runtime
        .list_workflows()
        .await
        .iter()
        .map(|w| {
            serde_json::json!({
                "id": w.id,
                "name": w.name,
                "description": w.description,
                "version": w.version,
                "nodes": w.nodes.len(),
                "edges": w.edges.len(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(workflow_list))
}

/// Create or replace a workflow. Invalid graphs are rejected with 400.
#[post("/api/workflows")]
async fn create_workflow(
    data: web::Data<AppState>,
    workflow: web::Json<WorkflowDefinition>,
) -> ActixResult<impl Responder> {
    let workflow = workflow.into_inner();
    let workflow_id = workflow.id;

    info!("Creating workflow: {} ({})", workflow.name, workflow_id);

    match data.runtime.register_workflow(workflow).await {
        Ok(()) => Ok(HttpResponse::Created().json(WorkflowResponse {
            id: workflow_id,
            message: "Workflow created successfully".to_string(),
        })),
        Err(e) => {
            warn!("Rejected workflow {}: {}", workflow_id, e);
            Ok(error_response(e))
        }
    }
}

/// Get a specific workflow
#[get("/api/workflows/{id}")]
async fn get_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();

    match data.runtime.get_workflow(workflow_id).await {
        Some(workflow) => Ok(HttpResponse::Ok().json(workflow)),
        None => Ok(error_response(WorkflowError::NotFound(workflow_id.to_string()))),
    }
}

/// Delete a workflow
#[actix_web::delete("/api/workflows/{id}")]
async fn delete_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();

    match data.runtime.remove_workflow(workflow_id).await {
        Some(_) => {
            info!("Deleted workflow: {}", workflow_id);
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "message": "Workflow deleted successfully"
            })))
        }
        None => Ok(error_response(WorkflowError::NotFound(workflow_id.to_string()))),
    }
}

/// Executions of one workflow, newest first
#[get("/api/workflows/{id}/executions")]
async fn list_executions(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    page: web::Query<Page>,
) -> ActixResult<impl Responder> {
    let executions = data
        .runtime
        .list_executions(path.into_inner(), page.skip, page.limit)
        .await;
    Ok(HttpResponse::Ok().json(executions))
}

/// Start an execution. Returns immediately with the pending record.
#[post("/api/executions")]
async fn create_execution(
    data: web::Data<AppState>,
    req: web::Json<CreateExecutionRequest>,
) -> ActixResult<impl Responder> {
    let req = req.into_inner();
    let trigger = TriggerEvent {
        trigger_type: req.trigger_type,
        triggered_by: req.triggered_by,
        payload: req.payload,
    };

    info!("Executing workflow: {}", req.workflow_id);

    match data.runtime.create_execution(req.workflow_id, trigger).await {
        Ok(execution) => Ok(HttpResponse::Accepted().json(execution)),
        Err(e) => Ok(error_response(e)),
    }
}

#[get("/api/executions/{id}")]
async fn get_execution(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    match data.runtime.get_execution(path.into_inner()).await {
        Ok(execution) => Ok(HttpResponse::Ok().json(execution)),
        Err(e) => Ok(error_response(e)),
    }
}

#[get("/api/executions/{id}/logs")]
async fn get_execution_logs(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    match data.runtime.get_execution_logs(path.into_inner()).await {
        Ok(logs) => Ok(HttpResponse::Ok().json(logs)),
        Err(e) => Ok(error_response(e)),
    }
}

/// Request cancellation. The status changes once the engine has stopped the run.
#[post("/api/executions/{id}/cancel")]
async fn cancel_execution(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let execution_id = path.into_inner();
    match data.runtime.cancel_execution(execution_id).await {
        Ok(execution) => Ok(HttpResponse::Accepted().json(execution)),
        Err(e) => Ok(error_response(e)),
    }
}

/// WebSocket endpoint for real-time events, optionally filtered by `execution_id`
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    filter: web::Query<EventFilter>,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;
    let only = filter.execution_id;

    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if only.is_some_and(|id| id != event.execution_id()) {
                                continue;
                            }
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagged, {} events dropped", skipped);
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List available node types
#[get("/api/nodes")]
async fn list_node_types(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.registry();

    let nodes: Vec<_> = registry
        .list_node_types()
        .iter()
        .map(|node_type| {
            serde_json::json!({
                "type": node_type,
                "metadata": registry.get_metadata(node_type),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(nodes))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting workflow server");

    let registry = Arc::new(wfnodes::standard_registry());
    let runtime = FlowRuntime::with_registry(registry, RuntimeConfig::from_env());

    info!(node_types = ?runtime.registry().list_node_types(), "Runtime initialized");

    let app_state = web::Data::new(AppState {
        runtime: Arc::new(runtime),
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(list_workflows)
            .service(create_workflow)
            .service(get_workflow)
            .service(delete_workflow)
            .service(list_executions)
            .service(create_execution)
            .service(get_execution)
            .service(get_execution_logs)
            .service(cancel_execution)
            .service(websocket_events)
            .service(list_node_types)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
