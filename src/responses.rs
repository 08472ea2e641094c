use atat::atat_derive::AtatResp;

/// Responses of the engine's commands are consumed line by line, the typed response is empty
#[derive(Clone, AtatResp)]
pub struct NoResponse;
