use discovery::{ADDRESS_LABEL, INSTANCE_LABEL, LabelSet};

use crate::registry::Instance;

/// Convert instances of one service into label sets, one per scrapable
/// instance, keeping the order of the input.
///
/// Besides the address and instance labels, every metadata entry of the
/// instance becomes a label, with its key sanitized to a valid label name.
/// Metadata never overrides the address or instance label.
///
/// Instances without host or port can not be scraped, they are dropped.
pub fn map_instances(service: &str, instances: &[Instance]) -> Vec<LabelSet> {
    let mut targets = Vec::with_capacity(instances.len());

    for instance in instances {
        let Some(address) = address(instance) else {
            debug!(
                message = "instance skipped, no usable address",
                service,
                host = %instance.host,
                port = instance.port,
            );

            continue;
        };

        let mut labels = LabelSet::new();
        for (key, value) in &instance.metadata {
            let Some(name) = sanitize_label_name(key) else {
                continue;
            };

            if name == ADDRESS_LABEL || name == INSTANCE_LABEL {
                continue;
            }

            labels.insert(name, value.clone());
        }

        labels.insert(INSTANCE_LABEL.to_string(), address.clone());
        labels.insert(ADDRESS_LABEL.to_string(), address);

        targets.push(labels);
    }

    targets
}

fn address(instance: &Instance) -> Option<String> {
    let host = instance.host.trim();
    if host.is_empty() || instance.port == 0 {
        return None;
    }

    // IPv6 literal
    if host.contains(':') && !host.starts_with('[') {
        return Some(format!("[{host}]:{}", instance.port));
    }

    Some(format!("{host}:{}", instance.port))
}

/// Label names must match `[a-zA-Z_][a-zA-Z0-9_]*`
fn sanitize_label_name(key: &str) -> Option<String> {
    if key.is_empty() {
        return None;
    }

    let mut name = String::with_capacity(key.len() + 1);
    if key.starts_with(|c: char| c.is_ascii_digit()) {
        name.push('_');
    }

    for c in key.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            name.push(c);
        } else {
            name.push('_');
        }
    }

    Some(name)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty() {
        assert!(map_instances("svc", &[]).is_empty());
    }

    #[test]
    fn address_and_instance() {
        let targets = map_instances(
            "node-exporter",
            &[
                Instance::new("10.0.0.1", 9100),
                Instance::new("node-2.example.com", 9100),
            ],
        );

        assert_eq!(
            targets,
            vec![
                labels(&[
                    ("__address__", "10.0.0.1:9100"),
                    ("instance", "10.0.0.1:9100")
                ]),
                labels(&[
                    ("__address__", "node-2.example.com:9100"),
                    ("instance", "node-2.example.com:9100")
                ]),
            ]
        );
    }

    #[test]
    fn drop_unusable() {
        let input = [
            Instance::new("", 9100),
            Instance::new("10.0.0.1", 0),
            Instance::new("10.0.0.2", 9100),
            Instance::new("  ", 9100),
        ];

        let targets = map_instances("svc", &input);
        assert!(targets.len() <= input.len());
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0]["__address__"], "10.0.0.2:9100");
    }

    #[test]
    fn keep_input_order() {
        let input = (1..=20)
            .map(|i| Instance::new(format!("10.0.0.{i}"), 9100 + i))
            .collect::<Vec<_>>();

        let targets = map_instances("svc", &input);
        assert_eq!(targets.len(), input.len());
        for (instance, target) in input.iter().zip(targets.iter()) {
            assert_eq!(
                target["__address__"],
                format!("{}:{}", instance.host, instance.port)
            );
        }
    }

    #[test]
    fn no_dedup() {
        let input = [Instance::new("10.0.0.1", 9100), Instance::new("10.0.0.1", 9100)];

        let targets = map_instances("svc", &input);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0], targets[1]);
    }

    #[test]
    fn ipv6() {
        let targets = map_instances(
            "svc",
            &[Instance::new("fe80::1", 9100), Instance::new("[::1]", 9100)],
        );

        assert_eq!(targets[0]["__address__"], "[fe80::1]:9100");
        assert_eq!(targets[1]["__address__"], "[::1]:9100");
    }

    #[test]
    fn metadata() {
        let instance = Instance::new("192.168.18.24", 9100)
            .with_metadata("__meta_chixiao_app", "chixiao")
            .with_metadata("__meta_chixiao_businessType", "MYSQL")
            .with_metadata("preserved.register.source", "SPRING_CLOUD")
            .with_metadata("9zone", "a")
            .with_metadata("", "ignored")
            .with_metadata("__address__", "1.1.1.1:80")
            .with_metadata("instance", "overridden");

        let targets = map_instances("mysql", &[instance]);
        assert_eq!(
            targets,
            vec![labels(&[
                ("__address__", "192.168.18.24:9100"),
                ("__meta_chixiao_app", "chixiao"),
                ("__meta_chixiao_businessType", "MYSQL"),
                ("_9zone", "a"),
                ("instance", "192.168.18.24:9100"),
                ("preserved_register_source", "SPRING_CLOUD"),
            ])]
        );
    }

    #[test]
    fn deterministic() {
        let input = [Instance::new("10.0.0.1", 9100)
            .with_metadata("b", "2")
            .with_metadata("a", "1")];

        let first = map_instances("svc", &input);
        let second = map_instances("svc", &input);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn sanitize() {
        for (input, want) in [
            ("", None),
            ("foo", Some("foo")),
            ("foo.bar-baz", Some("foo_bar_baz")),
            ("1abc", Some("_1abc")),
            ("中文", Some("__")),
        ] {
            assert_eq!(sanitize_label_name(input).as_deref(), want, "input: {input}");
        }
    }
}
