//! Random perturbation of generated arguments ("dumb" fuzzing).

use crate::{
    random::{
        RandomError,
        RandomGenerator,
    },
    syscall::{
        ArgumentSet,
        LogType,
        SyscallEntryShadow,
    },
};

/// Most byte changes applied to a single buffer
const MAX_BYTE_MUTATIONS: u32 = 8;

const INTERESTING_BYTES: &[u8] = &[0x00, 0x01, 0x7f, 0x80, 0xff];

const INTERESTING_VALUES: &[u64] = &[0, 1, 4096, 0x7fff_ffff, 0x8000_0000, 0xffff_ffff, u64::MAX];

fn mutate_buffer<R: RandomGenerator>(buf: &mut [u8], rng: &mut R) -> Result<(), RandomError> {
    if buf.is_empty() {
        return Ok(());
    }

    let count = 1 + rng.range(MAX_BYTE_MUTATIONS)?;

    for _ in 0..count {
        let pos = rng.range(buf.len() as u32)? as usize;

        match rng.range(3)? {
            0 => buf[pos] = rng.range(256)? as u8,
            1 => buf[pos] ^= 1 << rng.range(8)?,
            _ => buf[pos] = INTERESTING_BYTES[rng.range(INTERESTING_BYTES.len() as u32)? as usize],
        }
    }

    Ok(())
}

fn mutate_value<R: RandomGenerator>(value: u64, rng: &mut R) -> Result<u64, RandomError> {
    Ok(match rng.range(3)? {
        0 => value ^ (1 << rng.range(32)?),
        1 => {
            let delta = 1 + rng.range(16)? as u64;

            if rng.one_in(2)? {
                value.wrapping_add(delta)
            } else {
                value.wrapping_sub(delta)
            }
        },
        _ => INTERESTING_VALUES[rng.range(INTERESTING_VALUES.len() as u32)? as usize],
    })
}

/// Perturb the arguments of one invocation in place.
///
/// Every buffer gets a few byte-level changes. Plain values change only if their type
/// allows it, and then only every fourth time.
pub fn mutate_arguments<R: RandomGenerator>(entry: &SyscallEntryShadow, args: &mut ArgumentSet, rng: &mut R) -> Result<(), RandomError> {
    for (ctx, arg) in entry.args().iter().zip(args.iter_mut()) {
        if let Some(buf) = arg.buffer_mut() {
            mutate_buffer(buf, rng)?;
        } else if ctx.mutable && ctx.log_type == LogType::Number && rng.one_in(4)? {
            let value = mutate_value(arg.value(), rng)?;
            arg.set_value(value);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        child::ChildPool,
        random::Random,
        syscall::{
            generate_arguments,
            ArgType,
            Resources,
            SyscallEntry,
            SyscallTable,
        },
    };

    static TABLE: &[SyscallEntry] = &[
        SyscallEntry::new("getcwd", libc::SYS_getcwd, &[ArgType::VoidBuf, ArgType::Size]),
        SyscallEntry::new("fstat", libc::SYS_fstat, &[ArgType::FileDesc, ArgType::StatBuf]),
    ];

    #[test]
    fn test_buffer_changes() {
        let mut rng = Random::with_seed(5);
        let mut buf = vec![0u8; 64];
        let mut changed = false;

        for _ in 0..16 {
            mutate_buffer(&mut buf, &mut rng).unwrap();
            changed |= buf.iter().any(|x| *x != 0);
        }

        assert!(changed);
        mutate_buffer(&mut [], &mut rng).unwrap();
    }

    #[test]
    fn test_immutable_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let resources = Resources::open(dir.path(), 0).unwrap();
        let table = SyscallTable::build(TABLE).unwrap();
        let pool = ChildPool::new(1).unwrap();
        let child = pool.get_child_from_index(0).unwrap();
        let mut rng = Random::with_seed(11);

        for number in 0..2 {
            let entry = table.get_entry(number).unwrap();

            for _ in 0..100 {
                let mut args = generate_arguments(entry, child, &mut rng, &resources).unwrap();
                let before = args.values();
                mutate_arguments(entry, &mut args, &mut rng).unwrap();

                // Neither SIZE_T nor FILE_DESC may change and buffers keep their address
                assert_eq!(before, args.values());
            }
        }
    }
}
