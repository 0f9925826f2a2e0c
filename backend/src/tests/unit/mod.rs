mod automation;
