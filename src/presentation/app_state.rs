// Application state for HTTP handlers
use crate::application::query_service::QueryService;
use crate::application::stream_service::StreamQueryService;

#[derive(Clone)]
pub struct AppState {
    pub query_service: QueryService,
    pub stream_service: StreamQueryService,
}
