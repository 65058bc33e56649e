use std::sync::Arc;

use chrono::Utc;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::tokio::task::spawn_blocking;
use rocket::{get, routes, Build, Rocket, State};
use rocket_dyn_templates::Template;

use crate::app::App;
use crate::error::Result;
use crate::stats::{self, BlockRow, PoolStats, UserPayouts, UserWorkers};

/// Runs a database bound closure off the async executor.
async fn blocking<T, F>(app: &State<Arc<App>>, work: F) -> std::result::Result<T, Status>
  where F: FnOnce(&App) -> Result<T> + Send + 'static,
        T: Send + 'static {
  let app = app.inner().clone();
  match spawn_blocking(move || work(&app)).await {
    Ok(Ok(value)) => Ok(value),
    Ok(Err(err)) => {
      warn!("Request failed: {}", err);
      Err(Status::InternalServerError)
    }
    Err(err) => {
      error!("Request worker panicked: {}", err);
      Err(Status::InternalServerError)
    }
  }
}

#[get("/")]
async fn index(app: &State<Arc<App>>) -> std::result::Result<Template, Status> {
  let context = blocking(app, |app| {
    let stats = stats::gather(app, Utc::now().naive_utc())?;
    Ok(stats::template_context(&stats, &app.config))
  }).await?;
  Ok(Template::render("pool_stats", context))
}

#[get("/api/pool_stats")]
async fn pool_stats(app: &State<Arc<App>>) -> std::result::Result<Json<PoolStats>, Status> {
  blocking(app, |app| stats::gather(app, Utc::now().naive_utc())).await.map(Json)
}

#[get("/api/blocks")]
async fn blocks(app: &State<Arc<App>>) -> std::result::Result<Json<Vec<BlockRow>>, Status> {
  blocking(app, |app| {
    let height = stats::chain_height(app, &app.config.coin_symbol);
    stats::recent_block_rows(app, height)
  }).await.map(Json)
}

#[get("/<address>/payouts")]
async fn payouts(app: &State<Arc<App>>, address: &str) -> std::result::Result<Json<UserPayouts>, Status> {
  // The pattern keeps anything but a plain address out of the queries
  if !app.is_listed_address(address) {
    return Err(Status::NotFound);
  }
  let address = address.to_owned();
  blocking(app, move |app| stats::gather_user(app, &address)).await.map(Json)
}

#[get("/<address>/workers")]
async fn workers(app: &State<Arc<App>>, address: &str) -> std::result::Result<Json<UserWorkers>, Status> {
  if !app.is_listed_address(address) {
    return Err(Status::NotFound);
  }
  let address = address.to_owned();
  blocking(app, move |app| stats::gather_workers(app, &address, Utc::now().naive_utc())).await.map(Json)
}

pub fn rocket(app: Arc<App>) -> Rocket<Build> {
  let web = app.config.web.clone();
  let figment = rocket::Config::figment()
    .merge(("address", web.address))
    .merge(("port", web.port))
    .merge(("template_dir", web.templates));
  rocket::custom(figment)
    .manage(app)
    .attach(Template::fairing())
    .mount("/", routes![index, pool_stats, blocks, payouts, workers])
}
