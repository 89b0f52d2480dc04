// Desync verdicts.
//
// Once every active client has reported its hash for a turn, the session
// hands the reports to a `DesyncPolicy`. The policy decides whether the
// turn is a desync, which hash (if any) counts as correct, and which
// clients get told. The relay has no simulation of its own, so the verdict
// can only come from comparing clients with each other.

use std::collections::BTreeMap;

use frontier_protocol::ClientId;

/// Outcome of a disagreement on one turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesyncVerdict {
    pub correct_hash: Option<i64>,
    pub clients_with_correct_hash: u32,
    pub total_active_clients: u32,
    /// Clients that receive a `desync` notice.
    pub notify: Vec<ClientId>,
}

pub trait DesyncPolicy: Send {
    /// Judge the hashes reported for one turn. `None` means the clients
    /// agree.
    fn evaluate(&self, reports: &BTreeMap<ClientId, i64>) -> Option<DesyncVerdict>;
}

/// Strict majority wins. Without one there is no correct hash and every
/// reporting client is notified.
#[derive(Clone, Copy, Debug, Default)]
pub struct MajorityVote;

impl DesyncPolicy for MajorityVote {
    fn evaluate(&self, reports: &BTreeMap<ClientId, i64>) -> Option<DesyncVerdict> {
        let mut tally: BTreeMap<i64, u32> = BTreeMap::new();
        for hash in reports.values() {
            *tally.entry(*hash).or_default() += 1;
        }
        if tally.len() <= 1 {
            return None;
        }

        let total = reports.len() as u32;
        let mut best: Option<(i64, u32)> = None;
        for (hash, count) in &tally {
            if best.is_none_or(|(_, c)| *count > c) {
                best = Some((*hash, *count));
            }
        }

        match best {
            Some((hash, count)) if count * 2 > total => Some(DesyncVerdict {
                correct_hash: Some(hash),
                clients_with_correct_hash: count,
                total_active_clients: total,
                notify: reports
                    .iter()
                    .filter(|(_, h)| **h != hash)
                    .map(|(id, _)| id.clone())
                    .collect(),
            }),
            _ => Some(DesyncVerdict {
                correct_hash: None,
                clients_with_correct_hash: 0,
                total_active_clients: total,
                notify: reports.keys().cloned().collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reports(entries: &[(&str, i64)]) -> BTreeMap<ClientId, i64> {
        entries
            .iter()
            .map(|(id, h)| (ClientId::new(*id).unwrap(), *h))
            .collect()
    }

    #[test]
    fn agreement_is_not_a_desync() {
        let r = reports(&[("AAAA1111", 5), ("BBBB2222", 5)]);
        assert_eq!(MajorityVote.evaluate(&r), None);
    }

    #[test]
    fn single_reporter_is_not_a_desync() {
        let r = reports(&[("AAAA1111", 5)]);
        assert_eq!(MajorityVote.evaluate(&r), None);
    }

    #[test]
    fn minority_client_is_singled_out() {
        let r = reports(&[
            ("AAAA1111", 42),
            ("BBBB2222", 42),
            ("CCCC3333", 42),
            ("DDDD4444", 99),
        ]);
        let verdict = MajorityVote.evaluate(&r).unwrap();
        assert_eq!(verdict.correct_hash, Some(42));
        assert_eq!(verdict.clients_with_correct_hash, 3);
        assert_eq!(verdict.total_active_clients, 4);
        assert_eq!(verdict.notify, vec![ClientId::new("DDDD4444").unwrap()]);
    }

    #[test]
    fn even_split_has_no_correct_hash() {
        let r = reports(&[
            ("AAAA1111", 1),
            ("BBBB2222", 1),
            ("CCCC3333", 2),
            ("DDDD4444", 2),
        ]);
        let verdict = MajorityVote.evaluate(&r).unwrap();
        assert_eq!(verdict.correct_hash, None);
        assert_eq!(verdict.clients_with_correct_hash, 0);
        assert_eq!(verdict.notify.len(), 4);
    }

    #[test]
    fn plurality_is_not_enough() {
        let r = reports(&[
            ("AAAA1111", 1),
            ("BBBB2222", 1),
            ("CCCC3333", 2),
            ("DDDD4444", 3),
            ("EEEE5555", 4),
        ]);
        assert_eq!(MajorityVote.evaluate(&r).unwrap().correct_hash, None);
    }
}
