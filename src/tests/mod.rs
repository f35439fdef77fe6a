mod invalid_json;
mod membership;
mod unread;
mod users;
