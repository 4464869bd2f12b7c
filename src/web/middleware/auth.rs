use salvo::affix as affix_state;
use salvo::prelude::*;

use crate::web::handlers::{health, provisioning, reply_failure};
use crate::web::AdminState;

/// Rejects provisioning calls that do not carry the configured bearer
/// token. Leaving the token unset opens the API, which only makes sense for
/// local development.
#[handler]
pub async fn check_admin_token(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
    ctrl: &mut FlowCtrl,
) {
    let expected = depot
        .obtain::<AdminState>()
        .ok()
        .and_then(|state| state.admin_token.clone());
    let Some(expected) = expected else {
        return;
    };

    let authorized = req
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected);

    if !authorized {
        reply_failure(res, StatusCode::UNAUTHORIZED, "admin token required");
        ctrl.skip_rest();
    }
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .hoop(affix_state::inject(state))
        .push(Router::with_path("health").get(health::health_check))
        .push(
            Router::with_path("api")
                .hoop(check_admin_token)
                .push(
                    Router::with_path("bridges")
                        .get(provisioning::list_bridges)
                        .post(provisioning::create_bridge),
                )
                .push(
                    Router::with_path("bridges/{id}")
                        .get(provisioning::get_bridge_info)
                        .delete(provisioning::delete_bridge),
                )
                .push(Router::with_path("bridges/{id}/toggle").post(provisioning::toggle_bridge))
                .push(Router::with_path("bridges/{id}/repair").post(provisioning::repair_bridge)),
        )
}
