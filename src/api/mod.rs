//! All API endpoint setup

use axum::routing::delete;
use axum::routing::get;
use axum::routing::patch;
use axum::routing::post;
use axum::routing::put;
use axum::Router;

pub use current_user::CurrentUser;
pub use current_user::JwtKeys;
pub use request::Form;
pub use request::PathParameters;
pub use response::Error;
pub use response::Success;

use crate::storage::Storage;

mod current_user;
mod flows;
mod friends;
mod members;
mod moments;
mod request;
mod response;
mod users;

/// Get the Axum router for all API routes
pub fn router<S: Storage>() -> Router {
    let users = Router::new()
        .route("/", post(users::create::<S>))
        .route("/token", post(users::token::<S>))
        .route("/me", get(users::me::<S>))
        .route("/me/password", put(users::change_password::<S>));

    let members = Router::new()
        .route("/", get(members::list::<S>))
        .route("/", post(members::invite_member::<S>))
        .route("/accept", post(members::accept_invitation::<S>))
        .route("/decline", post(members::decline_invitation::<S>));

    let moments = Router::new()
        .route("/", get(moments::list::<S>))
        .route("/", post(moments::create::<S>))
        .route("/{moment}", get(moments::single::<S>))
        .route("/{moment}", patch(moments::update::<S>))
        .route("/{moment}", delete(moments::delete::<S>))
        .route("/{moment}/duplicate", post(moments::duplicate::<S>));

    let flows = Router::new()
        .route("/", get(flows::list::<S>))
        .route("/", post(flows::create::<S>))
        .route("/tags", get(flows::tags::<S>))
        .route("/{flow}", get(flows::single::<S>))
        .route("/{flow}", patch(flows::update::<S>))
        .route("/{flow}", delete(flows::delete::<S>))
        .nest("/{flow}/members", members)
        .nest("/{flow}/moments", moments);

    let friends = Router::new()
        .route("/", get(friends::list::<S>))
        .route("/{friend}", delete(friends::unfriend::<S>))
        .route("/requests", get(friends::requests::<S>))
        .route("/requests", post(friends::send_request::<S>))
        .route(
            "/requests/{request}/accept",
            post(friends::accept_request::<S>),
        )
        .route(
            "/requests/{request}/decline",
            post(friends::decline_request::<S>),
        );

    Router::new()
        .nest("/users", users)
        .nest("/flows", flows)
        .nest("/friends", friends)
}
