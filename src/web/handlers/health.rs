use salvo::prelude::*;
use serde_json::json;

use super::admin_state;

#[handler]
pub async fn health_check(depot: &mut Depot, res: &mut Response) {
    let Some(state) = admin_state(depot, res) else {
        return;
    };
    res.render(Json(json!({
        "status": "ok",
        "uptime_seconds": state.booted_at.elapsed().as_secs(),
    })));
}
