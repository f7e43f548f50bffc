//! Emergency notice content and its per-channel renderings.

use campus_core::types::{AlertId, AlertType, GeoPoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyNotice {
    pub alert_id: AlertId,
    pub alert_type: AlertType,
    pub landmark: String,
    pub location: GeoPoint,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

impl EmergencyNotice {
    /// Compact text for SMS. Carries the landmark, never raw coordinates.
    pub fn sms_text(&self) -> String {
        format!(
            "OAU EMERGENCY ALERT\nType: {}\nLocation: {}\nTime: {}\nAlert ID: {}\n{}\n\nIMMEDIATE RESPONSE REQUIRED",
            self.alert_type.display_name().to_uppercase(),
            self.landmark,
            self.triggered_at.format("%H:%M %d/%m/%Y"),
            self.alert_id.short(),
            self.message,
        )
    }

    pub fn email_subject(&self) -> String {
        format!(
            "OAU CAMPUS EMERGENCY - {}",
            self.alert_type.display_name().to_uppercase()
        )
    }

    pub fn email_text(&self) -> String {
        format!(
            "OAU CAMPUS EMERGENCY ALERT\n\n\
             Alert Type: {}\n\
             Time: {}\n\
             Alert ID: {}\n\n\
             LOCATION DETAILS:\n\
             - Landmark: {}\n\
             - Coordinates: {:.6}, {:.6}\n\n\
             MESSAGE: {}\n\n\
             IMMEDIATE ACTION REQUIRED:\n\
             Please coordinate response with campus security and emergency services.\n",
            self.alert_type.display_name().to_uppercase(),
            self.triggered_at.format("%H:%M on %d/%m/%Y"),
            self.alert_id,
            self.landmark,
            self.location.latitude,
            self.location.longitude,
            self.message,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn notice() -> EmergencyNotice {
        EmergencyNotice {
            alert_id: AlertId::new(),
            alert_type: AlertType::Medical,
            landmark: "Near Sports Complex".to_string(),
            location: GeoPoint::new(7.5189, 4.5234),
            message: "Rider fell off bike".to_string(),
            triggered_at: Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap(),
        }
    }

    #[test]
    fn test_sms_text() {
        let n = notice();
        let text = n.sms_text();
        assert!(text.contains("Type: MEDICAL"));
        assert!(text.contains("Location: Near Sports Complex"));
        assert!(text.contains("Time: 14:05 09/03/2024"));
        assert!(text.contains(&n.alert_id.short()));
        assert!(text.contains("Rider fell off bike"));
        assert!(!text.contains("7.5189"));
    }

    #[test]
    fn test_email_rendering() {
        let n = notice();
        assert_eq!(n.email_subject(), "OAU CAMPUS EMERGENCY - MEDICAL");
        let body = n.email_text();
        assert!(body.contains("7.518900, 4.523400"));
        assert!(body.contains("MESSAGE: Rider fell off bike"));
        assert!(body.contains(&n.alert_id.to_string()));
    }
}
