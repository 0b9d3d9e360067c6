//! Demo HTTP service, handy for checking a node end to end

use crate::service::options::OverrideOptions;
use crate::service::{CallValue, HttpReply, Service};

pub fn service() -> Service {
    Service::new("confirm").source(file!()).http(
        "GET",
        "/confirm/available",
        "get_available",
        OverrideOptions::new(),
        |_req| async {
            Ok(CallValue::Http(HttpReply::new(
                200,
                "confirm service is available",
            )))
        },
    )
}
