pub mod health;
pub mod provisioning;

use salvo::prelude::*;
use serde_json::json;

use super::AdminState;

/// Failure envelope shared by the admin handlers.
pub(crate) fn reply_failure(res: &mut Response, status: StatusCode, message: impl Into<String>) {
    res.status_code(status);
    res.render(Json(json!({ "ok": false, "error": message.into() })));
}

/// Pulls the injected [`AdminState`] out of the depot. Answers 500 when the
/// router was somehow built without it.
pub(crate) fn admin_state<'d>(depot: &'d Depot, res: &mut Response) -> Option<&'d AdminState> {
    match depot.obtain::<AdminState>() {
        Ok(state) => Some(state),
        Err(_) => {
            reply_failure(
                res,
                StatusCode::INTERNAL_SERVER_ERROR,
                "admin state missing from request depot",
            );
            None
        }
    }
}
