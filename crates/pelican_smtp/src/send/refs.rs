// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! Resolution of the conversation parent from the `References` header.

use pelican_deps::tracing::{self, debug, instrument};

use pelican_core::{
    accounts::AddressMode,
    api::{DirectoryClient, Filter},
    message::INTERNAL_ID_DOMAIN,
};

use crate::error::SendError;

/// Walks the references, newest last, and returns the id of the message
/// this one replies to, if any.
///
/// Internal references are looked up in header order; stale drafts found on
/// the way are deleted and skipped. If no internal parent exists, the last
/// external reference is tried and accepted only on a unique match.
#[instrument(skip(client))]
pub(crate) async fn get_parent_id(
    client: &dyn DirectoryClient,
    addr_id: &str,
    addr_mode: AddressMode,
    references: &[String],
) -> Result<Option<String>, SendError> {
    let suffix = format!("@{INTERNAL_ID_DOMAIN}");
    let mut internal = Vec::new();
    let mut external = Vec::new();
    for reference in references {
        match reference.strip_suffix(&suffix) {
            Some(id) => internal.push(id.to_owned()),
            None => external.push(reference.clone()),
        }
    }

    let mut parent_id = None;

    for id in &internal {
        let mut filter = Filter::new();
        filter.insert(String::from("ID"), vec![id.clone()]);
        if addr_mode == AddressMode::Split {
            filter.insert(String::from("AddressID"), vec![addr_id.to_owned()]);
        }

        for metadata in client.get_all_message_metadata(&filter).await? {
            if metadata.is_draft {
                // The gateway never threads onto a stale draft.
                debug!(draft = %metadata.id, "Deleting stale draft");
                client.delete_message(&metadata.id).await?;
            } else {
                parent_id = Some(metadata.id);
            }
        }
    }

    // Several messages can share one external id; only a unique match is
    // trusted.
    if parent_id.is_none() {
        if let Some(last) = external.last() {
            let mut filter = Filter::new();
            filter.insert(String::from("ExternalID"), vec![last.clone()]);
            if addr_mode == AddressMode::Split {
                filter.insert(String::from("AddressID"), vec![addr_id.to_owned()]);
            }

            let metadata = client.get_all_message_metadata(&filter).await?;
            if metadata.len() == 1 {
                parent_id = Some(metadata[0].id.clone());
            }
        }
    }

    Ok(parent_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fake_client;
    use pelican_core::api::MessageMetadata;
    use pelican_deps::tokio;
    use std::sync::atomic::Ordering;

    fn refs(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| (*id).to_owned()).collect()
    }

    #[tokio::test]
    async fn internal_reference_resolves_parent() {
        let client = fake_client();
        client.add_metadata(MessageMetadata {
            id: String::from("abc"),
            address_id: String::from("a1"),
            external_id: None,
            is_draft: false,
        });

        let parent = get_parent_id(
            client.as_ref(),
            "a1",
            AddressMode::Combined,
            &refs(&["abc@pelican.internalid"]),
        )
        .await
        .expect("resolve");
        assert_eq!(parent.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn drafts_are_deleted_and_skipped() {
        let client = fake_client();
        client.add_metadata(MessageMetadata {
            id: String::from("abc"),
            address_id: String::from("a1"),
            external_id: None,
            is_draft: true,
        });
        client.add_metadata(MessageMetadata {
            id: String::from("m1"),
            address_id: String::from("a1"),
            external_id: Some(String::from("xyz@example.com")),
            is_draft: false,
        });

        // The internal lookup only finds a draft; the last external
        // reference resolves uniquely.
        let parent = get_parent_id(
            client.as_ref(),
            "a1",
            AddressMode::Combined,
            &refs(&["abc@pelican.internalid", "xyz@example.com"]),
        )
        .await
        .expect("resolve");
        assert_eq!(parent.as_deref(), Some("m1"));
        assert_eq!(*client.deleted.lock().expect("lock"), vec!["abc"]);
    }

    #[tokio::test]
    async fn only_drafts_yield_no_parent() {
        let client = fake_client();
        client.add_metadata(MessageMetadata {
            id: String::from("d1"),
            address_id: String::from("a1"),
            external_id: None,
            is_draft: true,
        });

        let parent = get_parent_id(
            client.as_ref(),
            "a1",
            AddressMode::Combined,
            &refs(&["d1@pelican.internalid"]),
        )
        .await
        .expect("resolve");
        assert!(parent.is_none());
        assert_eq!(*client.deleted.lock().expect("lock"), vec!["d1"]);
    }

    #[tokio::test]
    async fn ambiguous_external_reference_is_not_trusted() {
        let client = fake_client();
        for id in ["m1", "m2"] {
            client.add_metadata(MessageMetadata {
                id: id.to_owned(),
                address_id: String::from("a1"),
                external_id: Some(String::from("xyz@example.com")),
                is_draft: false,
            });
        }

        let parent = get_parent_id(
            client.as_ref(),
            "a1",
            AddressMode::Combined,
            &refs(&["xyz@example.com"]),
        )
        .await
        .expect("resolve");
        assert!(parent.is_none());
    }

    #[tokio::test]
    async fn only_the_last_external_reference_is_queried() {
        let client = fake_client();
        client.add_metadata(MessageMetadata {
            id: String::from("m-old"),
            address_id: String::from("a1"),
            external_id: Some(String::from("old@example.com")),
            is_draft: false,
        });
        client.add_metadata(MessageMetadata {
            id: String::from("m-new"),
            address_id: String::from("a1"),
            external_id: Some(String::from("new@example.com")),
            is_draft: false,
        });

        let parent = get_parent_id(
            client.as_ref(),
            "a1",
            AddressMode::Combined,
            &refs(&["old@example.com", "new@example.com"]),
        )
        .await
        .expect("resolve");
        assert_eq!(parent.as_deref(), Some("m-new"));
    }

    #[tokio::test]
    async fn split_mode_scopes_lookups_to_the_address() {
        let client = fake_client();
        client.add_metadata(MessageMetadata {
            id: String::from("abc"),
            address_id: String::from("other-address"),
            external_id: None,
            is_draft: false,
        });

        let parent = get_parent_id(
            client.as_ref(),
            "a1",
            AddressMode::Split,
            &refs(&["abc@pelican.internalid"]),
        )
        .await
        .expect("resolve");
        assert!(parent.is_none());
    }

    #[tokio::test]
    async fn directory_failure_aborts_with_a_transient_error() {
        let client = fake_client();
        client.fail_metadata.store(true, Ordering::Relaxed);

        let err = get_parent_id(
            client.as_ref(),
            "a1",
            AddressMode::Combined,
            &refs(&["abc@pelican.internalid"]),
        )
        .await
        .expect_err("aborts");
        assert_eq!(err.reply(), "451 4.4.1 Upstream service unavailable, try again later");
    }
}
