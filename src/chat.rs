//! Offline assistant.
//!
//! Canned responses keyed on message keywords; no model, no network. Alert
//! summaries come from whatever recent rows the caller hands in, so the
//! assistant keeps working when the database is empty or unavailable.

use crate::storage::AlertRow;

/// Answer a chat message with a canned response.
pub fn respond(message: &str, recent: &[AlertRow]) -> String {
    let message = message.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| message.contains(w));

    if mentions(&["alert", "recent", "what", "show"]) {
        if recent.is_empty() {
            return "No alerts detected yet. System is monitoring your surroundings.".to_string();
        }
        let mut response = format!("You have {} alerts. Recent detections:\n", recent.len());
        for alert in recent.iter().take(3) {
            response.push_str(&format!(
                "- {} at {:.1}m ({:.0}% confidence)\n",
                alert.object_class,
                alert.distance_m,
                alert.confidence * 100.0
            ));
        }
        return response;
    }

    if mentions(&["safety", "tip", "advice", "improve"]) {
        return "Here are key safety tips:\n\
                - Maintain 3-second following distance\n\
                - Check blind spots before lane changes\n\
                - Reduce speed in heavy traffic\n\
                - Stay alert, especially during rush hours\n\
                - Use driver assistance as assistance, not a replacement for attention"
            .to_string();
    }

    if mentions(&["how", "work", "explain"]) {
        return "The sentinel runs an object detector on every frame.\n\
                When a vehicle comes within 50 meters:\n\
                1. The system captures the annotated frame\n\
                2. Distance is estimated from camera calibration\n\
                3. A visual warning is overlaid on the stream\n\
                4. The event is logged for your review\n\
                \nThe closer the object, the more urgent the alert!"
            .to_string();
    }

    if mentions(&["distance", "close", "far"]) {
        return "Safe following distances:\n\
                - Critical (<30m): immediate attention needed\n\
                - Warning (30-50m): maintain awareness\n\
                - Safe (>50m): monitor the situation\n\
                \nAt highway speeds, keep at least 3 seconds of following distance."
            .to_string();
    }

    "I'm your driving assistant! Ask me about:\n\
     - Recent alerts and detections\n\
     - Safety tips and best practices\n\
     - How the system works\n\
     - Distance recommendations\n\
     \nWhat would you like to know?"
        .to_string()
}

/// Driving suggestions derived from recent alert counts.
pub fn suggestions(recent: &[AlertRow]) -> Vec<String> {
    if recent.is_empty() {
        return vec![
            "No recent alerts - you're driving safely!".to_string(),
            "Remember to maintain safe following distance".to_string(),
            "Stay alert and check your blind spots".to_string(),
        ];
    }

    let close_calls = recent.iter().filter(|a| a.distance_m < 30.0).count();
    if close_calls > 3 {
        vec![
            format!("You had {close_calls} close calls - increase following distance"),
            "Consider reducing speed in traffic".to_string(),
            "Take breaks to maintain focus".to_string(),
        ]
    } else {
        vec![
            format!("{} alerts detected - stay aware", recent.len()),
            "Good job maintaining safe distances".to_string(),
            "Continue monitoring your surroundings".to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(distance_m: f64) -> AlertRow {
        AlertRow {
            id: 1,
            created_at: 100,
            object_class: "car".to_string(),
            confidence: 0.87,
            distance_m,
            image_path: "captured_alerts/alert_100_20.0m.jpg".to_string(),
        }
    }

    #[test]
    fn alert_questions_summarize_recent_rows() {
        let recent = vec![alert(20.0), alert(35.5)];
        let reply = respond("show me recent alerts", &recent);
        assert!(reply.contains("2 alerts"));
        assert!(reply.contains("car at 20.0m"));
        assert!(reply.contains("87% confidence"));
    }

    #[test]
    fn alert_questions_without_data_report_quiet_system() {
        let reply = respond("any alerts?", &[]);
        assert!(reply.contains("No alerts detected yet"));
    }

    #[test]
    fn keyword_groups_dispatch_to_distinct_answers() {
        assert!(respond("give me a safety tip", &[]).contains("safety tips"));
        assert!(respond("how does this work", &[]).contains("object detector"));
        assert!(respond("is that too close?", &[]).contains("following distance"));
        assert!(respond("hello there", &[]).contains("driving assistant"));
    }

    #[test]
    fn suggestions_flag_repeated_close_calls() {
        let recent = vec![alert(10.0), alert(12.0), alert(15.0), alert(25.0)];
        let lines = suggestions(&recent);
        assert!(lines[0].contains("4 close calls"));

        let calm = suggestions(&[alert(45.0)]);
        assert!(calm[0].contains("1 alerts detected"));
    }
}
