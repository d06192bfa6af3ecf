//! Typed NetConnection/NetStream status codes

use crate::amf::AmfValue;
use crate::error::{AmfError, Result};
use crate::protocol::constants::*;

/// Status codes the publish path reacts to. Anything else stays available
/// as `Other` with the raw wire string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCode {
    ConnectSuccess,
    ConnectRejected,
    ConnectFailed,
    ConnectClosed,
    ConnectIdleTimeOut,
    PublishStart,
    PublishBadName,
    UnpublishSuccess,
    PauseNotify,
    UnpauseNotify,
    Other(String),
}

/// Notification level accompanying a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Status,
    Error,
}

impl StatusCode {
    pub fn parse(code: &str) -> Self {
        match code {
            NC_CONNECT_SUCCESS => StatusCode::ConnectSuccess,
            NC_CONNECT_REJECTED => StatusCode::ConnectRejected,
            NC_CONNECT_FAILED => StatusCode::ConnectFailed,
            NC_CONNECT_CLOSED => StatusCode::ConnectClosed,
            NC_CONNECT_IDLE_TIME_OUT => StatusCode::ConnectIdleTimeOut,
            NS_PUBLISH_START => StatusCode::PublishStart,
            NS_PUBLISH_BAD_NAME => StatusCode::PublishBadName,
            NS_UNPUBLISH_SUCCESS => StatusCode::UnpublishSuccess,
            NS_PAUSE_NOTIFY => StatusCode::PauseNotify,
            NS_UNPAUSE_NOTIFY => StatusCode::UnpauseNotify,
            other => StatusCode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StatusCode::ConnectSuccess => NC_CONNECT_SUCCESS,
            StatusCode::ConnectRejected => NC_CONNECT_REJECTED,
            StatusCode::ConnectFailed => NC_CONNECT_FAILED,
            StatusCode::ConnectClosed => NC_CONNECT_CLOSED,
            StatusCode::ConnectIdleTimeOut => NC_CONNECT_IDLE_TIME_OUT,
            StatusCode::PublishStart => NS_PUBLISH_START,
            StatusCode::PublishBadName => NS_PUBLISH_BAD_NAME,
            StatusCode::UnpublishSuccess => NS_UNPUBLISH_SUCCESS,
            StatusCode::PauseNotify => NS_PAUSE_NOTIFY,
            StatusCode::UnpauseNotify => NS_UNPAUSE_NOTIFY,
            StatusCode::Other(s) => s,
        }
    }

    pub fn level(&self) -> StatusLevel {
        match self {
            StatusCode::ConnectRejected
            | StatusCode::ConnectFailed
            | StatusCode::ConnectIdleTimeOut
            | StatusCode::PublishBadName => StatusLevel::Error,
            _ => StatusLevel::Status,
        }
    }
}

/// Parsed status info object from `_result`, `_error` or `onStatus`
#[derive(Debug, Clone)]
pub struct StatusInfo {
    pub code: StatusCode,
    pub level: StatusLevel,
    pub description: String,
}

impl StatusInfo {
    /// Parse the info object; the `code` property is required, the rest
    /// have sensible fallbacks.
    pub fn from_amf(info: &AmfValue) -> Result<Self> {
        let code = StatusCode::parse(info.get_str("code")?);
        let level = match info.get_str("level") {
            Ok("error") => StatusLevel::Error,
            Ok(_) => StatusLevel::Status,
            Err(AmfError::MissingProperty(_)) => code.level(),
            Err(e) => return Err(e.into()),
        };
        let description = info.get_str("description").unwrap_or_default().to_string();
        Ok(Self {
            code,
            level,
            description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_known_codes() {
        assert_eq!(
            StatusCode::parse("NetConnection.Connect.Success"),
            StatusCode::ConnectSuccess
        );
        assert_eq!(
            StatusCode::parse("NetStream.Publish.Start"),
            StatusCode::PublishStart
        );
        match StatusCode::parse("NetStream.Play.Start") {
            StatusCode::Other(s) => assert_eq!(s, "NetStream.Play.Start"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_strings() {
        for code in [
            StatusCode::ConnectSuccess,
            StatusCode::ConnectRejected,
            StatusCode::PublishStart,
            StatusCode::UnpublishSuccess,
        ] {
            assert_eq!(StatusCode::parse(code.as_str()), code);
        }
    }

    #[test]
    fn test_levels() {
        assert_eq!(StatusCode::ConnectSuccess.level(), StatusLevel::Status);
        assert_eq!(StatusCode::ConnectRejected.level(), StatusLevel::Error);
        assert_eq!(StatusCode::PublishBadName.level(), StatusLevel::Error);
    }

    #[test]
    fn test_status_info_from_amf() {
        let mut obj = HashMap::new();
        obj.insert("code".to_string(), AmfValue::String(NC_CONNECT_REJECTED.into()));
        obj.insert("level".to_string(), AmfValue::String("error".into()));
        obj.insert(
            "description".to_string(),
            AmfValue::String("?reason=needauth&salt=x".into()),
        );
        let info = StatusInfo::from_amf(&AmfValue::Object(obj)).unwrap();
        assert_eq!(info.code, StatusCode::ConnectRejected);
        assert_eq!(info.level, StatusLevel::Error);
        assert!(info.description.contains("needauth"));
    }

    #[test]
    fn test_status_info_defaults() {
        let mut obj = HashMap::new();
        obj.insert("code".to_string(), AmfValue::String(NS_PUBLISH_START.into()));
        let info = StatusInfo::from_amf(&AmfValue::Object(obj)).unwrap();
        assert_eq!(info.level, StatusLevel::Status);
        assert!(info.description.is_empty());

        let empty = AmfValue::Object(HashMap::new());
        assert!(StatusInfo::from_amf(&empty).is_err());
    }
}
