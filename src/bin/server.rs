use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::{App, HttpRequest, HttpResponse, HttpServer, get, middleware, web};
use async_trait::async_trait;
use bytestring::ByteString;
use sqlx::PgPool;
use uuid::Uuid;

use starbelly_subs::config::Config;
use starbelly_subs::database::{DatabaseGateway, PgGateway};
use starbelly_subs::requests::{self, Request};
use starbelly_subs::{InProcessJobTracker, JobTracker, Socket, SocketError, SocketKey, SubscriptionManager};

/// Adapts an `actix-ws` session to the engine's transport-agnostic
/// [`Socket`] trait. `Session::text` takes `&mut self`; a single writer
/// serialises sends the same way the teacher treats a socket as
/// single-writer per connection.
struct ActixSocket {
    key: SocketKey,
    remote_addr: SocketAddr,
    session: tokio::sync::Mutex<actix_ws::Session>,
}

#[async_trait]
impl Socket for ActixSocket {
    fn key(&self) -> SocketKey {
        self.key
    }

    fn remote_address(&self) -> SocketAddr {
        self.remote_addr
    }

    async fn send(&self, payload: ByteString) -> Result<(), SocketError> {
        self.session
            .lock()
            .await
            .text(payload)
            .await
            .map_err(|_| SocketError::Closed)
    }
}

#[get("/ws")]
async fn ws_endpoint(
    req: HttpRequest,
    body: web::Payload,
    manager: web::Data<SubscriptionManager>,
    tracker: web::Data<Arc<dyn JobTracker>>,
    db: web::Data<Arc<dyn DatabaseGateway>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, actix_web::Error> {
    let (response, session, stream) = actix_ws::handle(&req, body)?;
    let mut stream = stream
        .max_frame_size(64 * 1024)
        .aggregate_continuations()
        .max_continuation_size(2 * 1024 * 1024);

    let socket_key = SocketKey::new(Uuid::new_v4());
    let remote_addr = req.peer_addr().unwrap_or(SocketAddr::from(([0, 0, 0, 0], 0)));

    let mut ping_session = session.clone();
    let socket: Arc<dyn Socket> = Arc::new(ActixSocket {
        key: socket_key,
        remote_addr,
        session: tokio::sync::Mutex::new(session),
    });

    let manager = manager.into_inner();
    let tracker = tracker.into_inner().as_ref().clone();
    let db = db.into_inner().as_ref().clone();
    let default_interval = config.job_status_min_interval;

    actix_web::rt::spawn(async move {
        while let Some(Ok(msg)) = stream.recv().await {
            match msg {
                actix_ws::AggregatedMessage::Text(text) => match serde_json::from_str::<Request>(&text) {
                    Ok(request) => {
                        if let Err(err) = requests::dispatch(
                            request,
                            &manager,
                            tracker.clone(),
                            db.clone(),
                            socket.clone(),
                            default_interval,
                        )
                        .await
                        {
                            let reply = err.into_response(None);
                            if let Ok(payload) = serde_json::to_string(&reply) {
                                let _ = socket.send(ByteString::from(payload)).await;
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%socket_key, error = %err, "received malformed request");
                    }
                },
                actix_ws::AggregatedMessage::Ping(bytes) => {
                    let _ = ping_session.pong(&bytes).await;
                }
                actix_ws::AggregatedMessage::Close(_) => break,
                _ => {}
            }
        }

        tracing::info!(%socket_key, "socket closed, tearing down its subscriptions");
        manager.close_for_socket(socket_key).await;
    });

    Ok(response)
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    dotenvy::dotenv().ok();

    let config = Config::from_env();

    let pool = PgPool::connect(&config.database_url).await?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations completed successfully");

    let tracker: Arc<dyn JobTracker> = Arc::new(InProcessJobTracker::new());
    let db: Arc<dyn DatabaseGateway> = Arc::new(PgGateway::new(pool));
    let manager = SubscriptionManager::new();
    let bind_addr = config.bind_addr.clone();

    let tracker_data = web::Data::new(tracker);
    let db_data = web::Data::new(db);
    let manager_data = web::Data::new(manager);
    let config_data = web::Data::new(config);

    let http_server = HttpServer::new(move || {
        App::new()
            .app_data(tracker_data.clone())
            .app_data(db_data.clone())
            .app_data(manager_data.clone())
            .app_data(config_data.clone())
            .wrap(middleware::Logger::default())
            .service(ws_endpoint)
    })
    .bind(&bind_addr)?
    .run();

    http_server.await?;

    Ok(())
}
