// Request validation - turns raw query parameters into a DiagnosticRequest

use std::collections::HashMap;
use std::net::IpAddr;

use super::{DiagnosticRequest, Method};
use crate::config::LimitsConfig;
use crate::error::{DiagError, DiagResult};

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;
const DEFAULT_SCAN_START: u16 = 1;
const DEFAULT_SCAN_END: u16 = 1024;

pub struct RequestValidator {
    limits: LimitsConfig,
}

impl RequestValidator {
    pub fn new(limits: LimitsConfig) -> Self {
        RequestValidator { limits }
    }

    /// Validate the query parameters of one route.
    ///
    /// Parameter names follow the public routes: `target`/`count` for ping,
    /// `target` for traceroute, `domain` for dns, `host`/`start`/`end` for scan.
    pub fn validate(
        &self,
        method: Method,
        params: &HashMap<String, String>,
    ) -> DiagResult<DiagnosticRequest> {
        let mut request = DiagnosticRequest {
            method,
            target: String::new(),
            count: None,
            port_start: None,
            port_end: None,
        };

        match method {
            Method::Ping => {
                request.target = validate_target("target", params.get("target"), false)?;
                request.count = Some(self.validate_count(params.get("count"))?);
            }
            Method::Traceroute => {
                request.target = validate_target("target", params.get("target"), false)?;
            }
            Method::Dns => {
                request.target = validate_target("domain", params.get("domain"), true)?;
            }
            Method::Scan => {
                request.target = validate_target("host", params.get("host"), false)?;
                let (start, end) = self.validate_ports(params.get("start"), params.get("end"))?;
                request.port_start = Some(start);
                request.port_end = Some(end);
            }
        }

        Ok(request)
    }

    fn validate_count(&self, raw: Option<&String>) -> DiagResult<u8> {
        let Some(raw) = raw else {
            return Ok(self.limits.default_ping_count);
        };
        let max = self.limits.max_ping_count;
        let count = parse_number("count", raw)?;
        if count == 0 || count > max as u32 {
            return Err(DiagError::validation(
                "count",
                format!("must be between 1 and {}", max),
            ));
        }
        Ok(count as u8)
    }

    fn validate_ports(
        &self,
        raw_start: Option<&String>,
        raw_end: Option<&String>,
    ) -> DiagResult<(u16, u16)> {
        let start = match raw_start {
            Some(raw) => parse_port("start", raw)?,
            None => DEFAULT_SCAN_START,
        };
        let end = match raw_end {
            Some(raw) => parse_port("end", raw)?,
            None => DEFAULT_SCAN_END,
        };

        if start > end {
            return Err(DiagError::validation(
                "start",
                format!("must not be greater than end ({} > {})", start, end),
            ));
        }
        if end - start > self.limits.max_port_span {
            return Err(DiagError::validation(
                "end",
                format!(
                    "range {}-{} spans more than {} ports",
                    start, end, self.limits.max_port_span
                ),
            ));
        }
        Ok((start, end))
    }
}

fn parse_number(field: &'static str, raw: &str) -> DiagResult<u32> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| DiagError::validation(field, format!("'{}' is not a number", raw)))
}

fn parse_port(field: &'static str, raw: &str) -> DiagResult<u16> {
    let value = parse_number(field, raw)?;
    if value == 0 || value > u16::MAX as u32 {
        return Err(DiagError::validation(
            field,
            format!("port {} out of range 1-65535", value),
        ));
    }
    Ok(value as u16)
}

/// Accept an IP literal or a hostname, nothing else.
///
/// The target ends up on a command line, so it is checked against the
/// hostname grammar rather than filtered for bad characters. DNS lookups
/// also take `_` labels such as `_dmarc.example.com`.
fn validate_target(
    field: &'static str,
    raw: Option<&String>,
    allow_underscore: bool,
) -> DiagResult<String> {
    let target = raw.map(|s| s.trim()).unwrap_or("");
    if target.is_empty() {
        return Err(DiagError::missing(field));
    }

    if target.parse::<IpAddr>().is_ok() || is_valid_hostname(target, allow_underscore) {
        Ok(target.to_string())
    } else {
        Err(DiagError::validation(
            field,
            format!("'{}' is not a valid hostname or IP address", target),
        ))
    }
}

fn is_valid_hostname(name: &str, allow_underscore: bool) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > MAX_HOSTNAME_LEN {
        return false;
    }

    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || (allow_underscore && b == b'_'))
    })
}
