//! The methods answered by `udprpc serve`.

use log::*;
use serde_json::Value;
use udprpc::{ErrorObject, InboundRequest, Responder};

pub const METHODS: [&str; 4] = ["echo", "ping", "sum", "fail"];

pub fn demo_handler(request: InboundRequest, responder: Responder) {
    if request.is_notification() {
        info!("Notification '{}' from {}: {:?}", request.method, request.source, request.params);
        return;
    }
    debug!("Request '{}' from {}", request.method, request.source);
    responder.respond(evaluate(&request.method, &request.params));
}

pub fn evaluate(method: &str, params: &[Value]) -> Result<Value, ErrorObject> {
    match method {
        "echo" => Ok(params.first().cloned().unwrap_or(Value::Null)),
        "ping" => Ok(Value::from("pong")),
        "sum" => sum(params),
        "fail" => {
            let message = match params.first() {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => "failed on request".to_string(),
            };
            Err(ErrorObject::internal(message))
        }
        other => Err(ErrorObject::method_not_found(other).with_data(Value::from(METHODS.to_vec()))),
    }
}

fn sum(params: &[Value]) -> Result<Value, ErrorObject> {
    if let Some(ints) = params.iter().map(Value::as_i64).collect::<Option<Vec<_>>>() {
        return ints
            .into_iter()
            .try_fold(0i64, i64::checked_add)
            .map(Value::from)
            .ok_or_else(|| ErrorObject::invalid_params("sum overflows"));
    }
    params
        .iter()
        .map(Value::as_f64)
        .collect::<Option<Vec<_>>>()
        .map(|floats| Value::from(floats.into_iter().sum::<f64>()))
        .ok_or_else(|| ErrorObject::invalid_params("sum expects numeric parameters"))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use udprpc::codes;

    #[test]
    fn echo_and_ping() {
        assert_eq!(evaluate("echo", &[json!("hello"), json!(2)]), Ok(json!("hello")));
        assert_eq!(evaluate("echo", &[]), Ok(Value::Null));
        assert_eq!(evaluate("ping", &[]), Ok(json!("pong")));
    }

    #[test]
    fn sums() {
        assert_eq!(evaluate("sum", &[json!(1), json!(2), json!(-3)]), Ok(json!(0)));
        assert_eq!(evaluate("sum", &[json!(1), json!(2.5)]), Ok(json!(3.5)));
        assert_eq!(evaluate("sum", &[]), Ok(json!(0)));
        let err = evaluate("sum", &[json!(1), json!("two")]).unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
        let err = evaluate("sum", &[json!(i64::MAX), json!(1)]).unwrap_err();
        assert_eq!(err.message, "sum overflows");
    }

    #[test]
    fn failures() {
        assert_eq!(evaluate("fail", &[json!("nope")]), Err(ErrorObject::internal("nope")));
        let err = evaluate("launch", &[]).unwrap_err();
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);
        assert_eq!(err.data, Some(json!(["echo", "ping", "sum", "fail"])));
    }
}
