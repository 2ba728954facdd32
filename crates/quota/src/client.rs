/// Rate-limit key for a request: the user id when authenticated, otherwise
/// the first `X-Forwarded-For` hop, then `X-Real-IP`, then `"unknown"`.
pub fn client_identifier(
    user_id: Option<&str>,
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
) -> String {
    let non_empty = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    };

    user_id
        .and_then(non_empty)
        .or_else(|| forwarded_for.and_then(|h| h.split(',').next()).and_then(non_empty))
        .or_else(|| real_ip.and_then(non_empty))
        .unwrap_or_else(|| "unknown".to_string())
}
