//! Host metrics via sysinfo.
//!
//! CPU usage is meaningful from the second collection onward: sysinfo
//! derives it from the delta between refreshes.

use sysinfo::{Components, Disks, Networks, System};

use crate::Sample;

use super::{counter_sample, labelled_sample, sample, MetricExporter};

pub struct SystemExporter {
    sys: System,
    networks: Networks,
    disks: Disks,
    components: Components,
}

impl SystemExporter {
    pub fn new() -> Self {
        Self {
            sys: System::new(),
            networks: Networks::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
            components: Components::new_with_refreshed_list(),
        }
    }
}

impl Default for SystemExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricExporter for SystemExporter {
    fn name(&self) -> &str {
        "system"
    }

    fn collect(&mut self, now: i64) -> anyhow::Result<Vec<Sample>> {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.networks.refresh(true);
        self.disks.refresh(true);
        self.components.refresh(true);

        let mut samples = Vec::with_capacity(32);

        samples.push(sample(
            "cpu_usage_percent",
            self.sys.global_cpu_usage() as f64,
            now,
        ));

        let load = System::load_average();
        samples.push(sample("load_average_1m", load.one, now));
        samples.push(sample("load_average_5m", load.five, now));
        samples.push(sample("load_average_15m", load.fifteen, now));

        samples.push(counter_sample("uptime_seconds", System::uptime(), now, &[]));

        samples.push(counter_sample(
            "memory_total_bytes",
            self.sys.total_memory(),
            now,
            &[],
        ));
        samples.push(counter_sample(
            "memory_used_bytes",
            self.sys.used_memory(),
            now,
            &[],
        ));
        samples.push(counter_sample(
            "memory_available_bytes",
            self.sys.available_memory(),
            now,
            &[],
        ));
        samples.push(counter_sample(
            "swap_total_bytes",
            self.sys.total_swap(),
            now,
            &[],
        ));
        samples.push(counter_sample(
            "swap_used_bytes",
            self.sys.used_swap(),
            now,
            &[],
        ));

        for (device, data) in self.networks.iter() {
            let labels = [("device", device.as_str())];
            samples.push(counter_sample(
                "network_receive_bytes_total",
                data.total_received(),
                now,
                &labels,
            ));
            samples.push(counter_sample(
                "network_transmit_bytes_total",
                data.total_transmitted(),
                now,
                &labels,
            ));
            samples.push(counter_sample(
                "network_receive_packets_total",
                data.total_packets_received(),
                now,
                &labels,
            ));
            samples.push(counter_sample(
                "network_transmit_packets_total",
                data.total_packets_transmitted(),
                now,
                &labels,
            ));
        }

        for disk in self.disks.iter() {
            let mountpoint = disk.mount_point().to_string_lossy();
            let labels = [("mountpoint", mountpoint.as_ref())];
            let total = disk.total_space();
            let free = disk.available_space();
            samples.push(counter_sample("fs_total_bytes", total, now, &labels));
            samples.push(counter_sample("fs_free_bytes", free, now, &labels));
            samples.push(counter_sample(
                "fs_used_bytes",
                total.saturating_sub(free),
                now,
                &labels,
            ));
        }

        for component in self.components.iter() {
            if let Some(temperature) = component.temperature() {
                samples.push(labelled_sample(
                    "component_temp_celsius",
                    temperature as f64,
                    now,
                    &[("sensor", component.label())],
                ));
            }
        }

        Ok(samples)
    }
}
