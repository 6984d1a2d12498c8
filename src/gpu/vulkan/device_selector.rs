use std::ffi::CStr;

use ash::vk;
use tracing::info;

use super::{GPUError, QueueType};

/// First enumerated physical device and its reported name. No scoring.
pub fn pick_physical_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, String), GPUError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("{} physical devices", devices.len());

    let pdevice = *devices.first().ok_or(GPUError::NoPhysicalDevice)?;
    let properties = unsafe { instance.get_physical_device_properties(pdevice) };
    let name = unsafe {
        CStr::from_ptr(properties.device_name.as_ptr())
            .to_str()
            .unwrap_or("UNKNOWN")
            .to_string()
    };
    info!("Device: {}", name);
    Ok((pdevice, name))
}

/// Index of the first queue family that can serve `queue_type`.
///
/// Compute wants a compute family without graphics, Transfer a transfer
/// family without graphics or compute. There is no fallback to a more
/// general family.
pub fn select_queue_family(
    families: &[vk::QueueFamilyProperties],
    queue_type: QueueType,
) -> Result<u32, GPUError> {
    families
        .iter()
        .position(|f| queue_type.accepts(f.queue_flags))
        .map(|i| i as u32)
        .ok_or(GPUError::NoMatchingQueueFamily(queue_type))
}

/// Memory type index allowed by `type_bits` that has every bit of `properties`.
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32, GPUError> {
    memory.memory_types[..memory.memory_type_count as usize]
        .iter()
        .enumerate()
        .find(|(i, ty)| type_bits & (1 << i) != 0 && ty.property_flags.contains(properties))
        .map(|(i, _)| i as u32)
        .ok_or(GPUError::NoSuitableMemoryType)
}

/// Groups requested queues by family: `(family, count)` in first-seen order,
/// plus for every request the `(family, index within family)` it maps to.
pub fn group_queue_requests(families: &[u32]) -> (Vec<(u32, u32)>, Vec<(u32, u32)>) {
    let mut grouped: Vec<(u32, u32)> = Vec::new();
    let mut slots = Vec::with_capacity(families.len());
    for &family in families {
        match grouped.iter_mut().find(|(f, _)| *f == family) {
            Some((_, count)) => {
                slots.push((family, *count));
                *count += 1;
            }
            None => {
                slots.push((family, 0));
                grouped.push((family, 1));
            }
        }
    }
    (grouped, slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 4,
            ..Default::default()
        }
    }

    fn desktop_families() -> Vec<vk::QueueFamilyProperties> {
        vec![
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER | vk::QueueFlags::SPARSE_BINDING),
        ]
    }

    #[test]
    fn selects_dedicated_families() {
        let families = desktop_families();
        assert_eq!(select_queue_family(&families, QueueType::Graphics).unwrap(), 0);
        assert_eq!(select_queue_family(&families, QueueType::Compute).unwrap(), 1);
        assert_eq!(select_queue_family(&families, QueueType::Transfer).unwrap(), 2);
        assert_eq!(select_queue_family(&families, QueueType::Undefined).unwrap(), 0);
    }

    #[test]
    fn missing_family_is_an_error() {
        let families = vec![family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        assert!(matches!(
            select_queue_family(&families, QueueType::Transfer),
            Err(GPUError::NoMatchingQueueFamily(QueueType::Transfer))
        ));
        assert!(matches!(
            select_queue_family(&families, QueueType::Compute),
            Err(GPUError::NoMatchingQueueFamily(QueueType::Compute))
        ));
    }

    #[test]
    fn finds_host_visible_memory() {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        memory.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        memory.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        memory.memory_types[2].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        let want = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&memory, 0b111, want).unwrap(), 2);
        assert!(find_memory_type(&memory, 0b011, want).is_err());
        assert_eq!(
            find_memory_type(&memory, 0b010, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            1
        );
    }

    #[test]
    fn groups_queues_by_family() {
        let (grouped, slots) = group_queue_requests(&[0, 1, 1]);
        assert_eq!(grouped, vec![(0, 1), (1, 2)]);
        assert_eq!(slots, vec![(0, 0), (1, 0), (1, 1)]);
    }
}
