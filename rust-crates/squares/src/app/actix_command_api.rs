use crate::{
    Result,
    app::{
        change_feed::{
            BoxChange,
            ChangeFeed,
        },
        command_api::{
            Command,
            CommandApi,
            Responder,
        },
    },
    error::PoolError,
    grid::{
        Cell,
        GameId,
        UserId,
    },
    pool::GiveawayRequest,
    score::Score,
};
use actix_cors::Cors;
use actix_web::{
    App,
    HttpRequest,
    HttpResponse,
    HttpServer,
    dev::ServerHandle,
    error::ErrorInternalServerError,
    http::StatusCode,
    web,
};
use anyhow::{
    Context,
    anyhow,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    convert::Infallible,
    net::TcpListener,
    thread::JoinHandle,
};
use tokio::sync::{
    mpsc,
    oneshot,
};
use tokio_stream::{
    StreamExt,
    wrappers::{
        BroadcastStream,
        errors::BroadcastStreamRecvError,
    },
};

/// Set by the authenticating gateway in front of the service.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileBody {
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimBody {
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserBody {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordQuarterBody {
    pub quarter: u8,
    pub home_score: u32,
    pub away_score: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct QuoteQuery {
    count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreDto {
    pub score: Option<Score>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpiredDto {
    pub expired: usize,
}

pub struct ActixCommandApi {
    receiver: mpsc::Receiver<Command>,
    base_url: String,
    server_handle: ServerHandle,
    server_thread: Option<JoinHandle<()>>,
}

impl ActixCommandApi {
    pub async fn new(port: Option<u16>, feed: ChangeFeed) -> Result<Self> {
        let (sender, receiver) = mpsc::channel(64);

        let listener = TcpListener::bind(("127.0.0.1", port.unwrap_or(0)))
            .context("failed to bind HTTP listener for pool API")?;
        let address = listener
            .local_addr()
            .context("failed to read listener address")?;
        let base_url = format!("http://{}", address);

        tracing::info!("pool API listening on {}", base_url);

        let server = HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allowed_methods(["GET", "POST", "PUT", "DELETE"])
                .allow_any_header()
                .max_age(3600);
            App::new()
                .wrap(cors)
                .app_data(web::Data::new(sender.clone()))
                .app_data(web::Data::new(feed.clone()))
                .configure(routes)
        })
        .listen(listener)
        .context("failed to start Actix server")?
        .run();

        let server_handle = server.handle();
        let server_thread = std::thread::spawn(move || {
            let sys = actix_web::rt::System::new();
            let _ = sys.block_on(server);
        });

        Ok(Self {
            receiver,
            base_url,
            server_handle,
            server_thread: Some(server_thread),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl CommandApi for ActixCommandApi {
    async fn next_command(&mut self) -> Result<Command> {
        self.receiver
            .recv()
            .await
            .ok_or_else(|| anyhow!("command server closed"))
    }
}

impl Drop for ActixCommandApi {
    fn drop(&mut self) {
        let _ = self.server_handle.stop(true);
        if let Some(thread) = self.server_thread.take() {
            let _ = thread.join();
        }
    }
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/profile", web::put().to(handle_ensure_profile))
        .route("/admin/users/{user_id}", web::delete().to(handle_delete_user))
        .route(
            "/cron/expire-reservations",
            web::post().to(handle_expire_reservations),
        )
        .service(
            web::scope("/games/{game_id}")
                .route("/board", web::get().to(handle_board))
                .route("/score", web::get().to(handle_score))
                .route("/quote", web::get().to(handle_quote))
                .route("/changes", web::get().to(handle_changes))
                .route("/claims", web::post().to(handle_claim))
                .route("/claims", web::delete().to(handle_release_mine))
                .route(
                    "/admin/confirm-payment",
                    web::post().to(handle_confirm_payment),
                )
                .route("/admin/release-boxes", web::post().to(handle_release_boxes))
                .route("/admin/assign-numbers", web::post().to(handle_assign_numbers))
                .route("/admin/reset-numbers", web::post().to(handle_reset_numbers))
                .route("/admin/record-quarter", web::post().to(handle_record_quarter))
                .route("/admin/giveaway", web::post().to(handle_giveaway)),
        );
}

type Sender = web::Data<mpsc::Sender<Command>>;

fn caller(request: &HttpRequest) -> std::result::Result<UserId, PoolError> {
    request
        .headers()
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(UserId::new)
        .ok_or(PoolError::Unauthenticated)
}

/// Hand a command to the app loop and wait for its answer.
async fn forward<T>(
    sender: &Sender,
    command: impl FnOnce(Responder<T>) -> Command,
) -> actix_web::Result<std::result::Result<T, PoolError>> {
    let (responder, response) = oneshot::channel();
    let command = command(responder);
    tracing::debug!("forwarding {} command", command.name());
    sender
        .send(command)
        .await
        .map_err(|_| ErrorInternalServerError("unable to forward command"))?;
    response
        .await
        .map_err(|_| ErrorInternalServerError("command responder dropped"))
}

async fn handle_board(
    sender: Sender,
    game_id: web::Path<u32>,
) -> actix_web::Result<HttpResponse> {
    let game_id = GameId(game_id.into_inner());
    let board = forward(&sender, |responder| Command::Board { game_id, responder }).await??;
    Ok(HttpResponse::Ok().json(board))
}

async fn handle_score(
    sender: Sender,
    game_id: web::Path<u32>,
) -> actix_web::Result<web::Json<ScoreDto>> {
    let game_id = GameId(game_id.into_inner());
    let score = forward(&sender, |responder| Command::Score { game_id, responder }).await??;
    Ok(web::Json(ScoreDto { score }))
}

async fn handle_quote(
    request: HttpRequest,
    sender: Sender,
    game_id: web::Path<u32>,
    query: web::Query<QuoteQuery>,
) -> actix_web::Result<HttpResponse> {
    let caller = caller(&request)?;
    let game_id = GameId(game_id.into_inner());
    let count = query.count;
    let quote = forward(&sender, |responder| Command::Quote {
        game_id,
        caller,
        count,
        responder,
    })
    .await??;
    Ok(HttpResponse::Ok().json(quote))
}

/// Server-sent events, one `BoxChange` per message, for one game.
async fn handle_changes(
    feed: web::Data<ChangeFeed>,
    game_id: web::Path<u32>,
) -> HttpResponse {
    let game_id = GameId(game_id.into_inner());
    let events = BroadcastStream::new(feed.subscribe()).filter_map(move |change| {
        let change: BoxChange = match change {
            Ok(change) => change,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!("change subscriber lagged, skipped {skipped} changes");
                return None;
            }
        };
        if change.row.game_id != game_id {
            return None;
        }
        let json = serde_json::to_string(&change).ok()?;
        Some(Ok::<_, Infallible>(web::Bytes::from(format!("data: {json}\n\n"))))
    });
    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("cache-control", "no-cache"))
        .streaming(events)
}

async fn handle_ensure_profile(
    request: HttpRequest,
    sender: Sender,
    body: web::Json<ProfileBody>,
) -> actix_web::Result<HttpResponse> {
    let caller = caller(&request)?;
    let ProfileBody { full_name, email } = body.into_inner();
    let profile = forward(&sender, |responder| Command::EnsureProfile {
        caller,
        full_name,
        email,
        responder,
    })
    .await??;
    Ok(HttpResponse::Ok().json(profile))
}

/// Partial claims answer 409 but still carry the cells that were won.
async fn handle_claim(
    request: HttpRequest,
    sender: Sender,
    game_id: web::Path<u32>,
    body: web::Json<ClaimBody>,
) -> actix_web::Result<HttpResponse> {
    let caller = caller(&request)?;
    let game_id = GameId(game_id.into_inner());
    let cells = body.into_inner().cells;
    let outcome = forward(&sender, |responder| Command::Claim {
        game_id,
        caller,
        cells,
        responder,
    })
    .await??;
    let status = if outcome.is_partial() {
        StatusCode::CONFLICT
    } else {
        StatusCode::OK
    };
    Ok(HttpResponse::build(status).json(outcome))
}

async fn handle_release_mine(
    request: HttpRequest,
    sender: Sender,
    game_id: web::Path<u32>,
) -> actix_web::Result<HttpResponse> {
    let caller = caller(&request)?;
    let game_id = GameId(game_id.into_inner());
    let released = forward(&sender, |responder| Command::ReleaseMine {
        game_id,
        caller,
        responder,
    })
    .await??;
    Ok(HttpResponse::Ok().json(released))
}

async fn handle_confirm_payment(
    request: HttpRequest,
    sender: Sender,
    game_id: web::Path<u32>,
    body: web::Json<UserBody>,
) -> actix_web::Result<HttpResponse> {
    let caller = caller(&request)?;
    let game_id = GameId(game_id.into_inner());
    let user = body.into_inner().user_id;
    let confirmed = forward(&sender, |responder| Command::ConfirmPayment {
        game_id,
        caller,
        user,
        responder,
    })
    .await??;
    Ok(HttpResponse::Ok().json(confirmed))
}

async fn handle_release_boxes(
    request: HttpRequest,
    sender: Sender,
    game_id: web::Path<u32>,
    body: web::Json<UserBody>,
) -> actix_web::Result<HttpResponse> {
    let caller = caller(&request)?;
    let game_id = GameId(game_id.into_inner());
    let user = body.into_inner().user_id;
    let released = forward(&sender, |responder| Command::ReleaseBoxes {
        game_id,
        caller,
        user,
        responder,
    })
    .await??;
    Ok(HttpResponse::Ok().json(released))
}

async fn handle_assign_numbers(
    request: HttpRequest,
    sender: Sender,
    game_id: web::Path<u32>,
) -> actix_web::Result<HttpResponse> {
    let caller = caller(&request)?;
    let game_id = GameId(game_id.into_inner());
    let game = forward(&sender, |responder| Command::AssignNumbers {
        game_id,
        caller,
        responder,
    })
    .await??;
    Ok(HttpResponse::Ok().json(game))
}

async fn handle_reset_numbers(
    request: HttpRequest,
    sender: Sender,
    game_id: web::Path<u32>,
) -> actix_web::Result<HttpResponse> {
    let caller = caller(&request)?;
    let game_id = GameId(game_id.into_inner());
    let game = forward(&sender, |responder| Command::ResetNumbers {
        game_id,
        caller,
        responder,
    })
    .await??;
    Ok(HttpResponse::Ok().json(game))
}

async fn handle_record_quarter(
    request: HttpRequest,
    sender: Sender,
    game_id: web::Path<u32>,
    body: web::Json<RecordQuarterBody>,
) -> actix_web::Result<HttpResponse> {
    let caller = caller(&request)?;
    let game_id = GameId(game_id.into_inner());
    let RecordQuarterBody {
        quarter,
        home_score,
        away_score,
    } = body.into_inner();
    let result = forward(&sender, |responder| Command::RecordQuarter {
        game_id,
        caller,
        quarter,
        home_score,
        away_score,
        responder,
    })
    .await??;
    Ok(HttpResponse::Ok().json(result))
}

async fn handle_giveaway(
    request: HttpRequest,
    sender: Sender,
    game_id: web::Path<u32>,
    body: web::Json<GiveawayRequest>,
) -> actix_web::Result<HttpResponse> {
    let caller = caller(&request)?;
    let game_id = GameId(game_id.into_inner());
    let request = body.into_inner();
    let outcome = forward(&sender, |responder| Command::DistributeGiveaway {
        game_id,
        caller,
        request,
        responder,
    })
    .await??;
    Ok(HttpResponse::Ok().json(outcome))
}

async fn handle_delete_user(
    request: HttpRequest,
    sender: Sender,
    user_id: web::Path<String>,
) -> actix_web::Result<HttpResponse> {
    let caller = caller(&request)?;
    let user = UserId::new(user_id.into_inner());
    let summary = forward(&sender, |responder| Command::DeleteUser {
        caller,
        user,
        responder,
    })
    .await??;
    Ok(HttpResponse::Ok().json(summary))
}

async fn handle_expire_reservations(
    sender: Sender,
) -> actix_web::Result<web::Json<ExpiredDto>> {
    let expired =
        forward(&sender, |responder| Command::ExpireReservations { responder }).await??;
    Ok(web::Json(ExpiredDto { expired }))
}
