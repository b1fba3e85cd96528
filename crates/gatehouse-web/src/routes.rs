use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Deserialize;
use tracing::error;

use crate::service::{Portal, PortalError};

const TOKEN_COOKIE: &str = "access_token";

#[derive(Clone)]
pub struct AppState {
    pub portal: Arc<Portal>,
    pub document_root: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(login_page))
        .route("/login", post(login))
        .route("/main", get(main_page))
        .route("/edit", post(edit))
        .with_state(state)
}

#[derive(Deserialize)]
struct LoginForm {
    id: String,
    pwd: String,
}

#[derive(Deserialize, Default)]
struct EditForm {
    #[serde(default)]
    nickname: String,
    #[serde(default)]
    pic_path: String,
    #[serde(default)]
    password: String,
}

async fn login_page(State(state): State<AppState>) -> Html<String> {
    let path = state.document_root.join("template/login.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(body) => Html(body),
        Err(_) => Html(FALLBACK_LOGIN_PAGE.to_string()),
    }
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    match state.portal.login(&form.id, &form.pwd).await {
        Ok(token) => {
            let jar = jar.add(Cookie::build((TOKEN_COOKIE, token)).path("/"));
            (jar, Redirect::to("/main")).into_response()
        }
        Err(PortalError::Forbidden) => {
            (StatusCode::FORBIDDEN, "wrong id or password").into_response()
        }
        Err(err) => {
            error!(%err, "login failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "server error").into_response()
        }
    }
}

async fn main_page(State(state): State<AppState>, jar: CookieJar) -> Response {
    let Some(cookie) = jar.get(TOKEN_COOKIE) else {
        return (StatusCode::UNAUTHORIZED, "no access token").into_response();
    };
    match state.portal.current_user(cookie.value()).await {
        Ok(user) => Html(render_main(&user.id, &user.nickname, &user.pic_path)).into_response(),
        Err(PortalError::Forbidden) => forbidden(jar),
        Err(err) => {
            error!(%err, "failed to fetch user info");
            (StatusCode::INTERNAL_SERVER_ERROR, "server error").into_response()
        }
    }
}

async fn edit(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<EditForm>,
) -> Response {
    let Some(cookie) = jar.get(TOKEN_COOKIE) else {
        return (StatusCode::UNAUTHORIZED, "no access token").into_response();
    };
    match state
        .portal
        .edit_user(cookie.value(), &form.nickname, &form.pic_path, &form.password)
        .await
    {
        Ok(()) => Redirect::to("/main").into_response(),
        Err(PortalError::Forbidden) => forbidden(jar),
        Err(err) => {
            error!(%err, "failed to edit user info");
            (StatusCode::INTERNAL_SERVER_ERROR, "server error").into_response()
        }
    }
}

/// Drop the token cookie and report forbidden: the backend no longer
/// accepts this token, so keeping it around only repeats the failure.
fn forbidden(jar: CookieJar) -> Response {
    let jar = jar.remove(Cookie::build(TOKEN_COOKIE).path("/"));
    (jar, (StatusCode::FORBIDDEN, "access denied")).into_response()
}

fn render_main(id: &str, nickname: &str, pic_path: &str) -> String {
    format!(
        concat!(
            "<!doctype html><html><body>",
            "<h1>Welcome, {nickname}</h1>",
            "<p>id: {id}</p>",
            "<img src=\"{pic}\" alt=\"profile picture\">",
            "<form method=\"post\" action=\"/edit\">",
            "<input name=\"nickname\" placeholder=\"new nickname\">",
            "<button type=\"submit\">save</button>",
            "</form>",
            "</body></html>"
        ),
        nickname = escape(nickname),
        id = escape(id),
        pic = escape(pic_path),
    )
}

const FALLBACK_LOGIN_PAGE: &str = concat!(
    "<!doctype html><html><body>",
    "<form method=\"post\" action=\"/login\">",
    "<input name=\"id\" placeholder=\"id\">",
    "<input name=\"pwd\" type=\"password\" placeholder=\"password\">",
    "<button type=\"submit\">log in</button>",
    "</form>",
    "</body></html>"
);

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
