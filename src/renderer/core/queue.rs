use ash::vk;

pub struct Queue {
    pub family: u32,
    pub handle: vk::Queue,
}

impl Queue {
    pub fn new(
        family: u32,
        handle: vk::Queue,
    ) -> Self {
        Self {
            family,
            handle,
        }
    }
}

/// Queue families used for drawing and presenting, possibly the same one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Picks the first graphics-capable family and the first present-capable family,
    /// preferring a single family that does both
    pub fn find(
        props: &[vk::QueueFamilyProperties],
        supports_present: impl Fn(u32) -> bool,
    ) -> Option<Self> {
        let supports_graphics = |q: &vk::QueueFamilyProperties| {
            q.queue_count > 0 && q.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        };

        let combined = props
            .iter()
            .enumerate()
            .position(|(i, q)| supports_graphics(q) && supports_present(i as u32));
        if let Some(index) = combined {
            return Some(Self {
                graphics: index as u32,
                present: index as u32,
            });
        }

        let graphics = props.iter().position(supports_graphics)?;
        let present = (0..props.len() as u32).find(|i| supports_present(*i))?;
        Some(Self {
            graphics: graphics as u32,
            present,
        })
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, one queue is created per entry
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_a_family_that_draws_and_presents() {
        let props = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let families = QueueFamilies::find(&props, |i| i != 0).unwrap();
        assert_eq!(families, QueueFamilies { graphics: 2, present: 2 });
        assert_eq!(families.unique(), vec![2]);
    }

    #[test]
    fn falls_back_to_separate_families() {
        let props = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let families = QueueFamilies::find(&props, |i| i == 1).unwrap();
        assert_eq!(families, QueueFamilies { graphics: 0, present: 1 });
        assert!(!families.is_shared());
        assert_eq!(families.unique(), vec![0, 1]);
    }

    #[test]
    fn no_present_support_means_no_families() {
        let props = [family(vk::QueueFlags::GRAPHICS)];
        assert_eq!(QueueFamilies::find(&props, |_| false), None);
    }
}
