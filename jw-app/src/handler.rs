//! Built-in demo request handler so a local bridge answers end to end.

use async_trait::async_trait;
use jw_chat::{GenericRequest, HandlerError, Output, RequestHandler};

pub struct EchoHandler;

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn handle(&self, request: GenericRequest) -> Result<Output, HandlerError> {
        let Some(verb) = request.args.first() else {
            return Err(HandlerError::MissingArguments(
                "no command given".to_string(),
            ));
        };
        match verb.as_str() {
            "help" => Ok(Output::text("commands: help, ping, echo <text>")),
            "ping" => Ok(Output::text("pong")),
            "echo" => {
                let rest = &request.args[1..];
                if rest.is_empty() {
                    Err(HandlerError::MissingArguments(
                        "echo needs something to repeat".to_string(),
                    ))
                } else {
                    Ok(Output::text(rest.join(" ")))
                }
            }
            other => Err(HandlerError::InvalidRequest(format!(
                "unknown command: {other}"
            ))),
        }
    }
}
