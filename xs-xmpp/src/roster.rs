//! Roster retrieval (RFC 6121 section 2).

use jid::BareJid;
use xmpp_parsers::roster::{Item, Roster, Subscription};
use xs_core::{XsError, XsResult};

use crate::client::XmppClient;
use crate::stanza;

/// Lookups on a fetched roster.
pub trait RosterExt {
    fn get(&self, jid: &BareJid) -> Option<&Item>;

    /// Whether presence is shared in both directions with `jid`.
    fn is_mutual(&self, jid: &BareJid) -> bool {
        matches!(self.get(jid), Some(item) if item.subscription == Subscription::Both)
    }
}

impl RosterExt for Roster {
    fn get(&self, jid: &BareJid) -> Option<&Item> {
        self.items.iter().find(|i| &i.jid == jid)
    }
}

impl XmppClient {
    /// Fetch the account's roster.
    pub async fn fetch_roster(&mut self) -> XsResult<Roster> {
        let request = stanza::iq_get(
            None,
            Roster {
                ver: None,
                items: Vec::new(),
            },
        );
        let Some(payload) = self.iq(request).await? else {
            return Ok(Roster {
                ver: None,
                items: Vec::new(),
            });
        };
        Roster::try_from(payload).map_err(|e| XsError::Xml(format!("roster: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minidom::Element;

    #[test]
    fn test_roster_lookup() {
        let query: Element = "<query xmlns='jabber:iq:roster'>\
             <item jid='bob@example.com' name='Bob' subscription='both'><group>Friends</group></item>\
             <item jid='carol@example.com' subscription='to' ask='subscribe'/>\
             </query>"
            .parse()
            .unwrap();
        let roster = Roster::try_from(query).unwrap();
        assert_eq!(roster.items.len(), 2);

        let bob = BareJid::new("bob@example.com").unwrap();
        let carol = BareJid::new("carol@example.com").unwrap();
        let dave = BareJid::new("dave@example.com").unwrap();
        assert_eq!(roster.get(&bob).unwrap().name.as_deref(), Some("Bob"));
        assert!(roster.is_mutual(&bob));
        assert!(!roster.is_mutual(&carol));
        assert!(!roster.is_mutual(&dave));
    }
}
