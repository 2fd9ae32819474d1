use rama::telemetry::tracing;

pub use libc::rlim_t;

/// Raise the soft `RLIMIT_NOFILE` limit towards `target`, clamped to the
/// hard limit. A run holding ~100k sockets at once blows through the
/// usual soft default of 1024 before anything else becomes the bottleneck.
pub fn raise_nofile(target: rlim_t) -> std::io::Result<()> {
    let mut lim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: lim is a valid, writable rlimit
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let wanted = target.min(lim.rlim_max);
    if lim.rlim_cur >= wanted {
        tracing::debug!(
            "nofile soft limit already at {} (wanted {wanted}): leave as is",
            lim.rlim_cur,
        );
        return Ok(());
    }

    let previous = lim.rlim_cur;
    lim.rlim_cur = wanted;
    // SAFETY: lim holds the validated new limits
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &lim) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    tracing::info!("nofile soft limit raised from {previous} to {wanted}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_below_current_soft_limit_is_a_no_op() {
        // zero is never above the current soft limit
        assert!(raise_nofile(0).is_ok());
    }
}
