//! Human-readable notification text.

use crate::delivery::DeliveryMessage;
use crate::jobs;
use crate::roster::RosterMember;

pub const FULL_PARTY_SIZE: u32 = 8;

pub const JOIN_BATCH_HEADER: &str = "The following members have joined the party:";
pub const PARTY_FULL_TITLE: &str = "Party full";
pub const PARTY_FULL_FOOTER: &str = "Party recruitment ended. All spots have been filled.";
pub const DUTY_POP_TITLE: &str = "Duty pop";
pub const DUTY_ROULETTE: &str = "Duty Roulette";

/// One message listing every member in `joins`.
///
/// The title reflects the party size reported with the most recent join.
/// Returns `None` for an empty batch.
pub fn join_batch(joins: &[RosterMember]) -> Option<DeliveryMessage> {
    let latest = joins.last()?;

    let mut body = String::from(JOIN_BATCH_HEADER);
    for member in joins {
        body.push_str(&format!(
            "\n• **{}** (Lv{} **{}**)",
            member.name,
            member.level,
            jobs::abbreviation(member.job_id)
        ));
    }

    let title = if latest.group_size >= FULL_PARTY_SIZE {
        body.push('\n');
        body.push_str(PARTY_FULL_FOOTER);
        PARTY_FULL_TITLE.to_string()
    } else {
        format!("{}/{FULL_PARTY_SIZE}: Party join", latest.group_size)
    };

    Some(DeliveryMessage::new(title, body))
}

/// `member.group_size` is the size before the leave, so the title shows one
/// fewer.
pub fn leave(member: &RosterMember) -> DeliveryMessage {
    DeliveryMessage::new(
        format!(
            "{}/{FULL_PARTY_SIZE}: Party leave",
            member.group_size.saturating_sub(1)
        ),
        format!(
            "{} (Lv{} {}) has left the party.",
            member.name,
            member.level,
            jobs::abbreviation(member.job_id)
        ),
    )
}

/// `None` means the queue popped a roulette rather than a named duty.
pub fn duty_pop(duty_name: Option<&str>) -> DeliveryMessage {
    let name = duty_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DUTY_ROULETTE);
    DeliveryMessage::new(DUTY_POP_TITLE, format!("Duty registered: '{name}'."))
}
