use rand::Rng;

use crate::types::{
    DnsRecord, DomainIntel, FileVerdict, IpIntel, Risk, ScanKind, ScanResult, UrlVerdict,
};

/// Threat list reported for URLs scoring above 80.
pub const NO_KNOWN_THREATS: &str = "No known threats";

/// Threat list reported for URLs scoring 80 or below.
pub const URL_THREATS: [&str; 2] = ["Phishing indicators", "Suspicious redirects"];

/// Number of points in the URL risk trend.
pub const URL_HISTORY_LEN: usize = 12;

/// Produce the placeholder result for a finished scan of `kind`.
///
/// Returns `None` for kinds without a simulated result (email).
/// The scanned input is deliberately not an argument: nothing is inspected.
pub fn synthesize<R: Rng + ?Sized>(kind: ScanKind, rng: &mut R) -> Option<ScanResult> {
    match kind {
        ScanKind::File => Some(ScanResult::File(file_verdict(rng))),
        ScanKind::Url => Some(ScanResult::Url(url_verdict(rng))),
        ScanKind::Dns => Some(ScanResult::Dns {
            records: dns_records(),
        }),
        ScanKind::Domain => Some(ScanResult::Domain(domain_intel())),
        ScanKind::Ip => Some(ScanResult::Ip(ip_intel())),
        ScanKind::Email => None,
    }
}

/// Detection rate in `[2, 22]` percent, the rest counted as clean.
pub fn file_verdict<R: Rng + ?Sized>(rng: &mut R) -> FileVerdict {
    let detections: u8 = rng.random_range(2..=22);
    FileVerdict {
        detections,
        clean: 100 - detections,
    }
}

pub fn url_verdict<R: Rng + ?Sized>(rng: &mut R) -> UrlVerdict {
    let score = (100.0 - rng.random::<f64>() * 35.0).round() as u8;
    let threats = if score > 80 {
        vec![NO_KNOWN_THREATS.to_string()]
    } else {
        URL_THREATS.iter().map(|t| t.to_string()).collect()
    };
    let history = (0..URL_HISTORY_LEN)
        .map(|_| (100.0 - rng.random::<f64>() * 50.0).round() as u8)
        .collect();
    UrlVerdict {
        score,
        threats,
        history,
    }
}

pub fn dns_records() -> Vec<DnsRecord> {
    const RECORDS: &[(&str, &str, Risk)] = &[
        ("A", "203.0.113.42", Risk::Low),
        ("AAAA", "2001:db8::8a2e:370:7334", Risk::Low),
        ("MX", "mail.example.com", Risk::Medium),
        ("TXT", "v=spf1 include:spf.example.com ~all", Risk::Low),
    ];
    RECORDS
        .iter()
        .map(|&(record_type, value, risk)| DnsRecord {
            record_type: record_type.to_string(),
            value: value.to_string(),
            risk,
        })
        .collect()
}

pub fn domain_intel() -> DomainIntel {
    DomainIntel {
        whois: "Registrar: Example LLC — Created: 2019-07-04".to_string(),
        reputation: "Good".to_string(),
        intel: vec![
            "No malware hosting detected".to_string(),
            "DNSSEC enabled".to_string(),
        ],
    }
}

pub fn ip_intel() -> IpIntel {
    IpIntel {
        geo: "Frankfurt, DE".to_string(),
        reputation: "Neutral".to_string(),
        risk: "Low".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn file_verdict_sums_to_100() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let v = file_verdict(&mut rng);
            assert!((2..=22).contains(&v.detections), "{v:?}");
            assert_eq!(v.detections as u16 + v.clean as u16, 100);
        }
    }

    #[test]
    fn url_threats_follow_score() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut saw_safe = false;
        let mut saw_risky = false;
        for _ in 0..500 {
            let v = url_verdict(&mut rng);
            assert!((65..=100).contains(&v.score), "{v:?}");
            assert_eq!(v.history.len(), URL_HISTORY_LEN);
            assert!(v.history.iter().all(|h| (50..=100).contains(h)));
            if v.score > 80 {
                saw_safe = true;
                assert_eq!(v.threats, vec![NO_KNOWN_THREATS.to_string()]);
            } else {
                saw_risky = true;
                assert_eq!(v.threats, URL_THREATS.map(String::from).to_vec());
            }
        }
        assert!(saw_safe && saw_risky);
    }

    #[test]
    fn dns_records_are_fixed() {
        let types: Vec<_> = dns_records().into_iter().map(|r| r.record_type).collect();
        assert_eq!(types, vec!["A", "AAAA", "MX", "TXT"]);
        assert_eq!(dns_records()[2].risk, Risk::Medium);
    }

    #[test]
    fn email_has_no_result() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(synthesize(ScanKind::Email, &mut rng).is_none());
        for kind in ScanKind::ALL.into_iter().filter(|k| k.is_simulated()) {
            let r = synthesize(kind, &mut rng).unwrap();
            assert_eq!(r.kind(), kind);
        }
    }
}
