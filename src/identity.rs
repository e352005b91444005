//! Visitor identity carried in a cookie.
use std::sync::OnceLock;

use http::{
    header::{COOKIE, SET_COOKIE},
    HeaderMap, HeaderValue,
};
use rand::{thread_rng, Rng};
use uuid::Uuid;

/// Return the visitor identity stored in the `cookie_name` cookie of `request`.
///
/// When the request carries no such cookie (or an empty one), a new time-ordered identity is
/// generated and written to `response` as a `Set-Cookie` header. The cookie value is returned as
/// is, without any validation of its format.
pub fn resolve_user_id(cookie_name: &str, request: &HeaderMap, response: &mut HeaderMap) -> String {
    if let Some(user_id) = extract_cookie(request, cookie_name).filter(|value| !value.is_empty()) {
        return user_id;
    }

    let user_id = Uuid::now_v1(node_id()).to_string();
    match HeaderValue::from_str(&format!("{cookie_name}={user_id}; Path=/")) {
        Ok(value) => {
            response.append(SET_COOKIE, value);
        }
        Err(err) => {
            log::warn!(target: "abtest", cookie_name; "unable to set visitor cookie: {}", err);
        }
    }
    user_id
}

/// Find the value of `cookie_name` in the `Cookie` header(s) of a request.
fn extract_cookie(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|header| header.split(';'))
        .find_map(|cookie| {
            let (name, value) = cookie.trim().split_once('=')?;
            (name.trim() == cookie_name).then(|| value.trim().to_owned())
        })
}

/// Random node id used for version 1 UUIDs, chosen once per process.
fn node_id() -> &'static [u8; 6] {
    static NODE_ID: OnceLock<[u8; 6]> = OnceLock::new();
    NODE_ID.get_or_init(|| {
        let mut node_id: [u8; 6] = thread_rng().gen();
        // Multicast bit marks the node id as random rather than a MAC address.
        node_id[0] |= 0x01;
        node_id
    })
}
