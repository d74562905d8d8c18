use crate::common::{Contact, Id};

#[derive(Debug, Clone)]
/// Contacts sorted by their XOR distance to a target, without duplicates.
pub struct ClosestContacts {
    target: Id,
    contacts: Vec<Contact>,
}

impl ClosestContacts {
    pub fn new(target: Id) -> Self {
        Self {
            target,
            contacts: Vec::with_capacity(200),
        }
    }

    // === Getters ===

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    // === Public Methods ===

    pub fn add(&mut self, contact: Contact) {
        if self.contacts.iter().any(|c| c == &contact) {
            return;
        }

        let seek = contact.fingerprint.xor(&self.target);

        let pos = match self
            .contacts
            .binary_search_by(|other| other.fingerprint.xor(&self.target).cmp(&seek))
        {
            Ok(pos) | Err(pos) => pos,
        };

        self.contacts.insert(pos, contact);
    }

    pub fn take(&self, k: usize) -> Vec<Contact> {
        self.contacts.iter().take(k).cloned().collect()
    }
}
