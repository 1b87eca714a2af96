use actix_web::{HttpResponse, Responder, get, http::header, web};
use common::jwt::JwtClaims;
use futures::stream;
use tokio::sync::broadcast::error::RecvError;

use crate::Notifier;

/// Live dashboard updates as server-sent events.
///
/// Each frame is `event: <name>` followed by a JSON `data:` line. Clients
/// receive events of their own thread and jobs, admins receive everything.
///
/// # Frontend Example
/// ```javascript
/// // EventSource cannot set headers, the token goes in the query string
/// const source = new EventSource(`/api/dashboard/events?token=${token}`);
/// source.addEventListener('message.created', (e) => refreshThread(JSON.parse(e.data)));
/// ```
#[get("")]
pub async fn get_events(
    claims: web::ReqData<JwtClaims>,
    notifier: web::Data<Notifier>,
) -> impl Responder {
    let viewer = claims.into_inner();
    let rx = notifier.events().subscribe();
    log::debug!("Event stream opened for {}", viewer.user_id);

    let frames = stream::unfold((rx, viewer), |(mut rx, viewer)| async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.visible_to(viewer.user_id, viewer.role) => {
                    if let Some(frame) = event.to_frame() {
                        return Some((
                            Ok::<_, actix_web::Error>(web::Bytes::from(frame)),
                            (rx, viewer),
                        ));
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Event stream of {} skipped {} event(s)", viewer.user_id, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(frames)
}
