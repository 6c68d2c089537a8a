//! Wire types for the WhatsApp Web sidecar protocol.

use serde::{Deserialize, Serialize};

/// Messages sent from the gateway to the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    Login {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(rename = "authDir", skip_serializing_if = "Option::is_none")]
        auth_dir: Option<String>,
        /// Credentials saved from an earlier login.
        #[serde(rename = "authToken", skip_serializing_if = "Option::is_none")]
        auth_token: Option<String>,
    },
    /// Unlink the device and drop its credentials.
    Logout {
        #[serde(rename = "accountId")]
        account_id: String,
    },
    /// Close the socket but keep credentials on disk.
    Close {
        #[serde(rename = "accountId")]
        account_id: String,
    },
    Status {
        #[serde(rename = "accountId", skip_serializing_if = "Option::is_none")]
        account_id: Option<String>,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    SendText {
        #[serde(rename = "accountId")]
        account_id: String,
        to: String,
        text: String,
        #[serde(rename = "requestId")]
        request_id: String,
    },
}

/// Messages received from the sidecar.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    Qr {
        #[serde(rename = "accountId")]
        account_id: String,
        qr: String,
    },
    QrScanned {
        #[serde(rename = "accountId")]
        account_id: String,
    },
    Connected {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(rename = "phoneNumber", default)]
        phone_number: Option<String>,
        #[serde(rename = "authToken", default)]
        auth_token: Option<String>,
    },
    Disconnected {
        #[serde(rename = "accountId")]
        account_id: String,
        reason: String,
    },
    LoggedOut {
        #[serde(rename = "accountId")]
        account_id: String,
    },
    SendResult {
        #[serde(rename = "requestId")]
        request_id: String,
        success: bool,
        #[serde(rename = "messageId", default)]
        message_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    StatusResponse {
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
        accounts: Vec<AccountStatus>,
    },
    Error {
        #[serde(rename = "accountId", default)]
        account_id: Option<String>,
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
        error: String,
    },
}

/// Account status from the sidecar.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccountStatus {
    #[serde(rename = "accountId")]
    pub account_id: String,
    pub connected: bool,
    #[serde(rename = "phoneNumber", default)]
    pub phone_number: Option<String>,
}

/// WhatsApp JID for a plain phone number. Values that already carry a
/// server part are passed through.
pub fn to_jid(number: &str) -> String {
    if number.contains('@') {
        return number.to_string();
    }
    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    format!("{digits}@s.whatsapp.net")
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn login_omits_missing_fields() {
        let msg = GatewayMessage::Login {
            account_id: "alice".into(),
            auth_dir: None,
            auth_token: Some("tok".into()),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "login", "accountId": "alice", "authToken": "tok"})
        );
    }

    #[test]
    fn send_text_shape() {
        let msg = GatewayMessage::SendText {
            account_id: "alice".into(),
            to: "1555@s.whatsapp.net".into(),
            text: "hi".into(),
            request_id: "r1".into(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "send_text",
                "accountId": "alice",
                "to": "1555@s.whatsapp.net",
                "text": "hi",
                "requestId": "r1",
            })
        );
    }

    #[test]
    fn parses_sidecar_events() {
        let connected: SidecarMessage =
            serde_json::from_str(r#"{"type":"connected","accountId":"alice","authToken":"t"}"#)
                .unwrap();
        assert_eq!(connected, SidecarMessage::Connected {
            account_id: "alice".into(),
            phone_number: None,
            auth_token: Some("t".into()),
        });

        let scanned: SidecarMessage =
            serde_json::from_str(r#"{"type":"qr_scanned","accountId":"alice"}"#).unwrap();
        assert_eq!(scanned, SidecarMessage::QrScanned {
            account_id: "alice".into()
        });

        let status: SidecarMessage = serde_json::from_str(
            r#"{"type":"status_response","accounts":[{"accountId":"a","connected":true}]}"#,
        )
        .unwrap();
        assert!(matches!(
            status,
            SidecarMessage::StatusResponse { request_id: None, ref accounts } if accounts[0].connected
        ));
    }

    #[test]
    fn jids() {
        assert_eq!(to_jid("+1 555 123"), "1555123@s.whatsapp.net");
        assert_eq!(to_jid("123@g.us"), "123@g.us");
    }
}
