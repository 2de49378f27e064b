//! Host path translation for pass-through volumes.
//!
//! When the coordinator itself runs inside a container and hands one of
//! its own mounts to a sibling container, the bind source must be the
//! path as the *host* knows it. The host's view is recovered from the
//! mount table: find the deepest ancestor of the given path that is a
//! mount destination and rewrite that prefix to the mount source.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

/// Resolves `path` to the host-side path, or returns it unchanged when it
/// is not inside any mount.
pub fn host_path(path: &str) -> String {
    let mounts = match std::fs::read_to_string("/proc/self/mountinfo") {
        Ok(content) => parse_mountinfo(&content),
        Err(err) => {
            debug!(error = %err, "mount table unavailable, passing volume path through");
            return path.to_string();
        }
    };
    translate(path, &mounts)
}

/// Mount destination → mount source, one entry per mount table line.
fn parse_mountinfo(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| {
            // 36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw
            //            root  mount-point
            let mut fields = line.split_whitespace().skip(3);
            let source = fields.next()?;
            let target = fields.next()?;
            Some((target.to_string(), source.to_string()))
        })
        .collect()
}

fn translate(path: &str, mounts: &HashMap<String, String>) -> String {
    let mut mount_path = Path::new(path);
    loop {
        if let Some(source) = mounts.get(mount_path.to_str().unwrap_or("/")) {
            let stripped = path.strip_prefix(&mount_path.display().to_string());
            return match stripped {
                Some(rest) => format!("{source}{rest}"),
                None => path.to_string(),
            };
        }
        match mount_path.parent() {
            Some(parent) => mount_path = parent,
            None => return path.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mounts() -> HashMap<String, String> {
        parse_mountinfo(
            "36 35 98:0 /host/workflows /workflows rw,noatime master:1 - ext4 /dev/root rw\n\
             37 35 98:0 /host/data /data/nested rw - ext4 /dev/root rw\n",
        )
    }

    #[test]
    fn parses_source_and_target_fields() {
        let mounts = mounts();
        assert_eq!(mounts["/workflows"], "/host/workflows");
        assert_eq!(mounts["/data/nested"], "/host/data");
    }

    #[test]
    fn rewrites_the_deepest_ancestor_mount() {
        let mounts = mounts();
        assert_eq!(
            translate("/workflows/user/wf.yaml", &mounts),
            "/host/workflows/user/wf.yaml"
        );
        assert_eq!(translate("/workflows", &mounts), "/host/workflows");
        assert_eq!(
            translate("/data/nested/deep/file", &mounts),
            "/host/data/deep/file"
        );
    }

    #[test]
    fn unmounted_paths_pass_through() {
        let mounts = mounts();
        assert_eq!(translate("/tmp/elsewhere", &mounts), "/tmp/elsewhere");
        assert_eq!(translate("/", &mounts), "/");
    }
}
