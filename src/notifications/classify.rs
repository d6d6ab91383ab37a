use crate::notifications::intent::NotificationIntent;
use crate::stream::record::{ChangeRecord, EventKind, RequestStatus, WashRequestView};

pub fn classify_new_request(record: &ChangeRecord) -> Option<NotificationIntent> {
    if record.event_kind != EventKind::Insert {
        return None;
    }
    let row = WashRequestView::from_row(record.new_row.as_ref()?);
    if row.status != Some(RequestStatus::Pending) {
        return None;
    }
    Some(NotificationIntent::new_request(row.id?, row.address))
}

pub fn classify_accepted(
    record: &ChangeRecord,
    organization_id: &str,
) -> Option<NotificationIntent> {
    let (request_id, organization_id) =
        transition_into(record, RequestStatus::Accepted, organization_id)?;
    Some(NotificationIntent::accepted(request_id, Some(organization_id)))
}

pub fn classify_cancelled(
    record: &ChangeRecord,
    organization_id: &str,
) -> Option<NotificationIntent> {
    let (request_id, organization_id) =
        transition_into(record, RequestStatus::Cancelled, organization_id)?;
    Some(NotificationIntent::cancelled(request_id, Some(organization_id)))
}

/// Judges one record by its own old and new images, never external state.
/// Fires only when the old image has a known status different from `target`
/// and the new image has `target`, for a record owned by `organization_id`.
fn transition_into(
    record: &ChangeRecord,
    target: RequestStatus,
    organization_id: &str,
) -> Option<(String, String)> {
    if record.event_kind != EventKind::Update {
        return None;
    }
    let new = WashRequestView::from_row(record.new_row.as_ref()?);
    let old = WashRequestView::from_row(record.old_row.as_ref()?);
    let (Some(before), Some(after)) = (old.status, new.status) else {
        return None;
    };
    if before == target || after != target {
        return None;
    }
    let owner = new.client_organization_id?;
    if owner != organization_id {
        return None;
    }
    Some((new.id?, owner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::intent::IntentKind;
    use serde_json::json;

    const TABLE: &str = "wash_requests";

    fn update(old_status: &str, new_status: &str, org: &str) -> ChangeRecord {
        ChangeRecord::update(
            TABLE,
            json!({"id": "r1", "status": old_status, "client_organization_id": org}),
            json!({"id": "r1", "status": new_status, "client_organization_id": org}),
        )
    }

    #[test]
    fn unchanged_status_never_fires() {
        for status in ["pending", "accepted", "completed", "cancelled"] {
            let record = update(status, status, "org1");
            assert_eq!(classify_accepted(&record, "org1"), None, "{status}");
            assert_eq!(classify_cancelled(&record, "org1"), None, "{status}");
        }
    }

    #[test]
    fn pending_to_accepted_yields_one_scoped_intent() {
        let intent = classify_accepted(&update("pending", "accepted", "org1"), "org1").unwrap();
        assert_eq!(intent.kind, IntentKind::RequestAccepted);
        assert_eq!(intent.request_id, "r1");
        assert_eq!(intent.organization_id.as_deref(), Some("org1"));
        assert_eq!(classify_cancelled(&update("pending", "accepted", "org1"), "org1"), None);
    }

    #[test]
    fn any_status_to_cancelled_fires() {
        for status in ["pending", "accepted", "completed"] {
            let intent = classify_cancelled(&update(status, "cancelled", "org1"), "org1").unwrap();
            assert_eq!(intent.kind, IntentKind::RequestCancelled);
        }
    }

    #[test]
    fn other_organization_is_ignored() {
        assert_eq!(classify_accepted(&update("pending", "accepted", "org2"), "org1"), None);
    }

    #[test]
    fn malformed_records_fail_closed() {
        let missing_id = ChangeRecord::update(
            TABLE,
            json!({"status": "pending", "client_organization_id": "org1"}),
            json!({"status": "accepted", "client_organization_id": "org1"}),
        );
        assert_eq!(classify_accepted(&missing_id, "org1"), None);

        let missing_old_status = ChangeRecord::update(
            TABLE,
            json!({"id": "r1"}),
            json!({"id": "r1", "status": "accepted", "client_organization_id": "org1"}),
        );
        assert_eq!(classify_accepted(&missing_old_status, "org1"), None);

        let no_old_row = ChangeRecord {
            old_row: None,
            ..update("pending", "cancelled", "org1")
        };
        assert_eq!(classify_cancelled(&no_old_row, "org1"), None);

        let insert_without_id =
            ChangeRecord::insert(TABLE, json!({"status": "pending", "address": "12 Rue X"}));
        assert_eq!(classify_new_request(&insert_without_id), None);
    }

    #[test]
    fn pending_insert_is_a_new_request() {
        let record = ChangeRecord::insert(
            TABLE,
            json!({"id": "r1", "status": "pending", "address": "12 Rue X"}),
        );
        let intent = classify_new_request(&record).unwrap();
        assert_eq!(intent.request_id, "r1");
        assert_eq!(intent.address.as_deref(), Some("12 Rue X"));

        let accepted_insert =
            ChangeRecord::insert(TABLE, json!({"id": "r2", "status": "accepted"}));
        assert_eq!(classify_new_request(&accepted_insert), None);
    }
}
