// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! An in-memory directory fake substituted for the HTTP client in tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use pelican_deps::async_trait::async_trait;

use pelican_core::{
    accounts::{Accounts, AddressType, GatewayUser},
    api::{
        ApiError, AttachmentMeta, Contact, ContactEmail, CreateAttachmentReq, CreateDraftReq,
        DirectoryClient, DraftMessage, Filter, MailSettings, MessageMetadata, RecipientType,
        SendReq, SentMessage,
    },
    config::{AddressConfig, Api, Config, Mail, UserConfig},
    crypto::{Key, PublicKey},
};

pub(crate) struct FakeDirectory {
    pub metadata: Mutex<Vec<MessageMetadata>>,
    pub keys: Mutex<HashMap<String, (Vec<PublicKey>, RecipientType)>>,
    pub contact_emails: Mutex<HashMap<String, Vec<ContactEmail>>>,
    pub contacts: Mutex<HashMap<String, Contact>>,
    pub deleted: Mutex<Vec<String>>,
    pub drafts: Mutex<Vec<CreateDraftReq>>,
    pub uploads: Mutex<Vec<CreateAttachmentReq>>,
    pub sent: Mutex<Vec<(String, SendReq)>>,
    pub fail_metadata: AtomicBool,
    attachment_counter: AtomicUsize,
}

pub(crate) fn fake_client() -> Arc<FakeDirectory> {
    Arc::new(FakeDirectory {
        metadata: Mutex::new(Vec::new()),
        keys: Mutex::new(HashMap::new()),
        contact_emails: Mutex::new(HashMap::new()),
        contacts: Mutex::new(HashMap::new()),
        deleted: Mutex::new(Vec::new()),
        drafts: Mutex::new(Vec::new()),
        uploads: Mutex::new(Vec::new()),
        sent: Mutex::new(Vec::new()),
        fail_metadata: AtomicBool::new(false),
        attachment_counter: AtomicUsize::new(0),
    })
}

impl FakeDirectory {
    pub(crate) fn set_keys(
        &self,
        email: &str,
        keys: Vec<PublicKey>,
        recipient_type: RecipientType,
    ) {
        self.keys
            .lock()
            .expect("lock")
            .insert(email.to_owned(), (keys, recipient_type));
    }

    pub(crate) fn set_contact(&self, email: &str, entry: ContactEmail, contact: Contact) {
        self.contact_emails
            .lock()
            .expect("lock")
            .entry(email.to_owned())
            .or_default()
            .push(entry);
        self.contacts
            .lock()
            .expect("lock")
            .insert(contact.id.clone(), contact);
    }

    pub(crate) fn add_metadata(&self, metadata: MessageMetadata) {
        self.metadata.lock().expect("lock").push(metadata);
    }
}

#[async_trait]
impl DirectoryClient for FakeDirectory {
    async fn get_all_message_metadata(
        &self,
        filter: &Filter,
    ) -> Result<Vec<MessageMetadata>, ApiError> {
        if self.fail_metadata.load(Ordering::Relaxed) {
            return Err(ApiError::Status(500));
        }
        let metadata = self.metadata.lock().expect("lock");
        Ok(metadata
            .iter()
            .filter(|entry| {
                filter.iter().all(|(key, values)| match key.as_str() {
                    "ID" => values.contains(&entry.id),
                    "ExternalID" => entry
                        .external_id
                        .as_ref()
                        .is_some_and(|id| values.contains(id)),
                    "AddressID" => values.contains(&entry.address_id),
                    _ => false,
                })
            })
            .cloned()
            .collect())
    }

    async fn get_public_keys(
        &self,
        email: &str,
    ) -> Result<(Vec<PublicKey>, RecipientType), ApiError> {
        Ok(self
            .keys
            .lock()
            .expect("lock")
            .get(email)
            .cloned()
            .unwrap_or((Vec::new(), RecipientType::External)))
    }

    async fn get_all_contact_emails(&self, email: &str) -> Result<Vec<ContactEmail>, ApiError> {
        Ok(self
            .contact_emails
            .lock()
            .expect("lock")
            .get(email)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_contact(&self, id: &str) -> Result<Contact, ApiError> {
        self.contacts
            .lock()
            .expect("lock")
            .get(id)
            .cloned()
            .ok_or(ApiError::Status(404))
    }

    async fn create_draft(&self, req: CreateDraftReq) -> Result<DraftMessage, ApiError> {
        self.drafts.lock().expect("lock").push(req);
        Ok(DraftMessage {
            id: String::from("draft-1"),
        })
    }

    async fn upload_attachment(
        &self,
        req: CreateAttachmentReq,
    ) -> Result<AttachmentMeta, ApiError> {
        let key_packets = req.key_packets.clone();
        self.uploads.lock().expect("lock").push(req);
        let id = self.attachment_counter.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(AttachmentMeta {
            id: format!("att-{id}"),
            key_packets,
        })
    }

    async fn send_draft(&self, draft_id: &str, req: SendReq) -> Result<SentMessage, ApiError> {
        self.sent.lock().expect("lock").push((draft_id.to_owned(), req));
        Ok(SentMessage {
            id: String::from("msg-1"),
        })
    }

    async fn delete_message(&self, id: &str) -> Result<(), ApiError> {
        self.deleted.lock().expect("lock").push(id.to_owned());
        self.metadata
            .lock()
            .expect("lock")
            .retain(|entry| entry.id != id);
        Ok(())
    }
}

/// One directory key pair's public half, as an internal service would
/// advertise it.
pub(crate) fn internal_keys() -> Vec<PublicKey> {
    vec![Key::generate(true).public_key()]
}

pub(crate) fn external_keys() -> Vec<PublicKey> {
    vec![Key::generate(true).public_key()]
}

/// A configured user `alice` with two owned addresses.
pub(crate) fn test_user() -> Arc<GatewayUser> {
    let config = Config {
        mail: Mail {
            hostname: String::from("localhost"),
            max_message_size: 26_214_400,
        },
        listen_ips: None,
        port: 1025,
        api: Api {
            base_url: String::from("http://localhost:8080"),
            token: String::from("token"),
            timeout_secs: 5,
        },
        users: vec![UserConfig {
            username: String::from("alice"),
            user_id: String::from("u1"),
            password_hash: pelican_core::accounts::hash_password("bridge-pass")
                .expect("hash"),
            address_mode: pelican_core::accounts::AddressMode::Combined,
            addresses: vec![
                AddressConfig {
                    id: String::from("a1"),
                    email: String::from("Alice@svc.test"),
                    addr_type: AddressType::Primary,
                    receives: true,
                    order: 0,
                },
                AddressConfig {
                    id: String::from("a2"),
                    email: String::from("second@svc.test"),
                    addr_type: AddressType::Alias,
                    receives: true,
                    order: 1,
                },
            ],
            settings: MailSettings::default(),
        }],
    };
    Accounts::from_config(&config)
        .lookup("alice")
        .expect("test user")
}
